//! In-process HTTP/1.1 server for network tests.
//!
//! Raw `TcpListener`, one connection per request (`Connection: close`), routes
//! matched on the exact request path. Just enough HTTP to exercise redirects,
//! lying `Content-Length` headers, unbounded bodies and stalled servers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the server sends back for a path.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// 200 with an exact `Content-Length`.
    Ok {
        content_type: &'static str,
        body: Vec<u8>,
    },
    /// A redirect; `None` omits the `Location` header.
    Redirect {
        status: u16,
        location: Option<String>,
    },
    /// Bare status with an empty body.
    Status(u16),
    /// 200 without `Content-Length`: `count` chunks of `chunk` bytes, then close.
    Stream { chunk: usize, count: usize },
    /// 200 advertising `declared` bytes but sending only `body`.
    LyingLength { declared: u64, body: Vec<u8> },
    /// Accept the request and never answer.
    Hang,
}

impl Reply {
    pub(crate) fn html(body: &str) -> Self {
        Reply::Ok {
            content_type: "text/html; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn text(body: &str) -> Self {
        Reply::Ok {
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }

    pub(crate) fn redirect(location: impl Into<String>) -> Self {
        Reply::Redirect {
            status: 302,
            location: Some(location.into()),
        }
    }
}

pub(crate) struct MockServer {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub(crate) async fn start(routes: Vec<(&str, Reply)>) -> Self {
        let routes: Arc<HashMap<String, Reply>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, reply)| (path.to_string(), reply))
                .collect(),
        );
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let hits_task = Arc::clone(&hits);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&hits_task);
                tokio::spawn(async move {
                    serve(stream, &routes, &hits).await;
                });
            }
        });

        Self { addr, hits, handle }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub(crate) fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received for `path` so far.
    pub(crate) fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    routes: &HashMap<String, Reply>,
    hits: &Mutex<HashMap<String, usize>>,
) {
    let Some(path) = read_request_path(&mut stream).await else {
        return;
    };
    *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let reply = routes.get(&path).cloned().unwrap_or(Reply::Status(404));
    match reply {
        Reply::Ok { content_type, body } => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                content_type,
                body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&body).await;
        }
        Reply::Redirect { status, location } => {
            let location = location
                .map(|l| format!("Location: {l}\r\n"))
                .unwrap_or_default();
            let head = format!(
                "HTTP/1.1 {status} Redirect\r\n{location}Content-Length: 0\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(head.as_bytes()).await;
        }
        Reply::Status(status) => {
            let head = format!(
                "HTTP/1.1 {status} Status\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(head.as_bytes()).await;
        }
        Reply::Stream { chunk, count } => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n";
            if stream.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            let block = vec![b'z'; chunk];
            for _ in 0..count {
                // The client hangs up once its cap trips.
                if stream.write_all(&block).await.is_err() {
                    return;
                }
            }
        }
        Reply::LyingLength { declared, body } => {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n"
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&body).await;
        }
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
    let _ = stream.shutdown().await;
}

async fn read_request_path(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 || buf.len() > 16 * 1024 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf);
    let request_line = head.lines().next()?;
    request_line.split_whitespace().nth(1).map(str::to_string)
}

/// A 1×1 white JPEG.
pub(crate) fn tiny_jpeg() -> Vec<u8> {
    jpeg_of(1, 1)
}

/// A solid grey JPEG of the given size.
pub(crate) fn jpeg_of(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([128, 128, 128]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

/// A solid PNG of the given size.
pub(crate) fn png_of(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
