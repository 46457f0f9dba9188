//! Loopback HTTP server shared by the integration tests.
//!
//! One request per connection, exact-path routing, unknown paths get 404.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub enum Route {
    Body {
        content_type: &'static str,
        body: Vec<u8>,
    },
    Redirect(String),
    Status(u16),
}

impl Route {
    pub fn html(body: &str) -> Self {
        Route::Body {
            content_type: "text/html; charset=utf-8",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn jpeg(body: Vec<u8>) -> Self {
        Route::Body {
            content_type: "image/jpeg",
            body,
        }
    }
}

pub struct Site {
    addr: SocketAddr,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    handle: JoinHandle<()>,
}

impl Site {
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let routes: Arc<HashMap<String, Route>> = Arc::new(
            routes
                .into_iter()
                .map(|(p, r)| (p.to_string(), r))
                .collect(),
        );
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let task_hits = Arc::clone(&hits);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                let hits = Arc::clone(&task_hits);
                tokio::spawn(async move { serve(stream, &routes, &hits).await });
            }
        });
        Self { addr, hits, handle }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for Site {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    routes: &HashMap<String, Route>,
    hits: &Mutex<HashMap<String, usize>>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let head = String::from_utf8_lossy(&buf).into_owned();
    let Some(path) = head
        .lines()
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .map(str::to_string)
    else {
        return;
    };
    *hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    let (status_line, extra, content_type, body) = match routes.get(&path).cloned() {
        Some(Route::Body { content_type, body }) => ("200 OK".to_string(), String::new(), content_type, body),
        Some(Route::Redirect(location)) => (
            "302 Found".to_string(),
            format!("Location: {location}\r\n"),
            "text/plain",
            Vec::new(),
        ),
        Some(Route::Status(code)) => (format!("{code} Status"), String::new(), "text/plain", Vec::new()),
        None => ("404 Not Found".to_string(), String::new(), "text/plain", Vec::new()),
    };
    let response_head = format!(
        "HTTP/1.1 {status_line}\r\n{extra}Content-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(response_head.as_bytes()).await;
    let _ = stream.write_all(&body).await;
    let _ = stream.shutdown().await;
}

/// A solid JPEG of the given size.
pub fn jpeg_of(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}
