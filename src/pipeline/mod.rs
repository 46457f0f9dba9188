//! Pipeline stages for safety-bounded fetching.
//!
//! Each submodule implements exactly one step. The network stages are layered
//! so that every request, whether for the document, a robots.txt file or an
//! image, goes through the same three checks.
//!
//! ## Data Flow
//!
//! ```text
//! address ◀── validate ◀── redirect ──▶ body
//! (classify)  (SSRF guard)  (hop loop)   (byte cap)
//!                               │
//!                 images ───────┘──▶ composite ──▶ encode
//!                 (window)           (stack)       (data URI)
//! ```
//!
//! 1. [`address`]: classify an IP as private/reserved or public; pure
//! 2. [`validate`]: scheme, literal, local-name and all-records DNS checks
//! 3. [`redirect`]: manual redirect following with a hop cap, per-attempt
//!    deadline and re-validation of every target
//! 4. [`body`]: streaming read that aborts at the byte limit
//! 5. [`images`]: sequential acquisition of a paginated image window
//! 6. [`composite`]: stack images into one JPEG; runs in `spawn_blocking`
//! 7. [`encode`]: base64 data URI for inline delivery

pub mod address;
pub mod body;
pub mod composite;
pub mod encode;
pub mod images;
pub mod redirect;
pub mod validate;
