//! Address classification: is an IP literal private or reserved?
//!
//! Pure functions with no I/O. The ranges are spelled out bit-by-bit rather
//! than delegated to `Ipv4Addr::is_private` and friends, because the std
//! helpers cover only part of the space this crate refuses to contact
//! (multicast and the `240/4` reserved block, for example) and several IPv6
//! helpers are still unstable.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Result of classifying an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    /// Loopback, private, link-local, shared, documentation, multicast,
    /// reserved or unspecified.
    Private,
    /// Routable on the public internet.
    Public,
    /// The input was not an IP literal.
    NotApplicable,
}

impl AddressClass {
    pub fn is_private(self) -> bool {
        self == AddressClass::Private
    }
}

/// Classify a parsed address.
pub fn classify(ip: IpAddr) -> AddressClass {
    let private = match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    };
    if private {
        AddressClass::Private
    } else {
        AddressClass::Public
    }
}

/// Classify a textual literal. Accepts bracketed IPv6 (`[::1]`).
///
/// Anything that does not parse as an IP address is
/// [`AddressClass::NotApplicable`].
pub fn classify_literal(literal: &str) -> AddressClass {
    let trimmed = literal
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(literal);
    match trimmed.parse::<IpAddr>() {
        Ok(ip) => classify(ip),
        Err(_) => AddressClass::NotApplicable,
    }
}

fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    let [a, b, c, _] = addr.octets();
    a == 10                                  // 10/8
        || (a == 172 && (b & 0xf0) == 16)    // 172.16/12
        || (a == 192 && b == 168)            // 192.168/16
        || a == 127                          // loopback
        || (a == 169 && b == 254)            // link-local
        || a == 0                            // "this" network
        || (a == 100 && (b & 0xc0) == 64)    // CGNAT 100.64/10
        || (a == 192 && b == 0 && c == 0)    // IETF protocol assignments
        || (a == 192 && b == 0 && c == 2)    // TEST-NET-1
        || (a == 198 && b == 51 && c == 100) // TEST-NET-2
        || (a == 203 && b == 0 && c == 113)  // TEST-NET-3
        || (a == 198 && (b & 0xfe) == 18)    // benchmarking 198.18/15
        || (224..=239).contains(&a)          // multicast
        || a >= 240                          // reserved + broadcast
}

fn is_private_ipv6(addr: Ipv6Addr) -> bool {
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    let segments = addr.segments();
    // NAT64 64:ff9b::/96 carries an IPv4 address in the low 32 bits.
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        let [_, _, _, _, _, _, _, _, _, _, _, _, a, b, c, d] = addr.octets();
        return is_private_ipv4(Ipv4Addr::new(a, b, c, d));
    }
    let first = segments[0];
    addr.is_unspecified()
        || addr.is_loopback()
        || (first & 0xffc0) == 0xfe80 // link-local fe80::/10
        || (first & 0xfe00) == 0xfc00 // unique-local fc00::/7
        || (first & 0xff00) == 0xff00 // multicast ff00::/8
        || (first == 0x2001 && segments[1] == 0x0db8) // documentation 2001:db8::/32
}
