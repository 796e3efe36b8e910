//! Shared helpers for integration tests: a small wiremock site and
//! configuration shortcuts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mirror_core::config::MirrorConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds an HTML page whose body links to each of `links`.
pub fn page(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!("<a href=\"{href}\">{href}</a>\n"))
        .collect();
    format!("<html><head><title>{title}</title></head><body>\n{anchors}</body></html>")
}

/// Mounts an HTML page at `route` that must be requested exactly `expected` times.
pub async fn mount_page(server: &MockServer, route: &str, body: String, expected: u64) {
    mount_page_with_delay(server, route, body, expected, Duration::ZERO).await;
}

/// Like [`mount_page`], delaying every response.
pub async fn mount_page_with_delay(
    server: &MockServer,
    route: &str,
    body: String,
    expected: u64,
    delay: Duration,
) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body, "text/html; charset=utf-8")
                .set_delay(delay),
        )
        .expect(expected)
        .named(route)
        .mount(server)
        .await;
}

/// Mounts a route answering with `status`.
pub async fn mount_status(server: &MockServer, route: &str, status: u16, expected: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .expect(expected)
        .named(route)
        .mount(server)
        .await;
}

/// The identifier prefix of the mock server, e.g. `127.0.0.1:41234`.
pub fn host_id(server: &MockServer) -> String {
    server.address().to_string()
}

/// Location of `route` in a mirror rooted at `root`.
pub fn stored_path(root: &Path, server: &MockServer, route: &str) -> PathBuf {
    stored_path_on(root, &host_id(server), route)
}

/// Location of `route` served by `host` in a mirror rooted at `root`.
pub fn stored_path_on(root: &Path, host: &str, route: &str) -> PathBuf {
    let mut stored = root.join(host);
    for segment in route.trim_matches('/').split('/') {
        stored.push(segment);
    }
    stored.set_extension("html");
    stored
}

/// Writes `content` at the stored location of `route`.
pub async fn preload(root: &Path, server: &MockServer, route: &str, content: &[u8]) -> PathBuf {
    let stored = stored_path(root, server, route);
    if let Some(parent) = stored.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(&stored, content).await.unwrap();
    stored
}

/// Configuration crawling only the mock server, starting at `seed_route`.
pub fn config(root: &Path, server: &MockServer, seed_route: &str, limit: i64) -> MirrorConfig {
    config_on(root, &host_id(server), seed_route, limit)
}

/// Configuration crawling only `host` over plain HTTP.
pub fn config_on(root: &Path, host: &str, seed_route: &str, limit: i64) -> MirrorConfig {
    MirrorConfig::builder()
        .output_root(root)
        .seed(format!("http://{host}{seed_route}"))
        .allow_pattern(regex_escape(host))
        .max_concurrent_fetches(limit)
        .build()
        .unwrap()
}

fn regex_escape(raw: &str) -> String {
    raw.replace('.', r"\.")
}

/// Bare HTTP/1.1 site that records how many requests it was answering at
/// once. Each response closes its connection, so one request is one
/// connection.
///
/// The gauge is raised once a request has been read and lowered before the
/// response is written, so it never exceeds the client's own in-flight count.
pub struct GaugedSite {
    address: SocketAddr,
    peak: Arc<AtomicUsize>,
    served: Arc<AtomicUsize>,
    accept: JoinHandle<()>,
}

impl GaugedSite {
    /// Serves `pages` (route, HTML body), holding every answer for `delay`.
    pub async fn start(pages: Vec<(String, String)>, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let pages: Arc<HashMap<String, String>> = Arc::new(pages.into_iter().collect());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let served = Arc::new(AtomicUsize::new(0));

        let accept = tokio::spawn({
            let peak = Arc::clone(&peak);
            let served = Arc::clone(&served);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let pages = Arc::clone(&pages);
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    let served = Arc::clone(&served);
                    tokio::spawn(async move {
                        if answer(stream, &pages, delay, &in_flight, &peak).await {
                            served.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            }
        });

        Self {
            address,
            peak,
            served,
            accept,
        }
    }

    /// The identifier prefix of the site, e.g. `127.0.0.1:41234`.
    pub fn host_id(&self) -> String {
        self.address.to_string()
    }

    /// Most requests answered simultaneously so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Requests answered so far.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for GaugedSite {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn answer(
    mut stream: TcpStream,
    pages: &HashMap<String, String>,
    delay: Duration,
    in_flight: &AtomicUsize,
    peak: &AtomicUsize,
) -> bool {
    let mut request = Vec::new();
    let mut buf = [0_u8; 1024];
    while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&request);
    let route = head.split_whitespace().nth(1).unwrap_or("/").to_string();

    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    in_flight.fetch_sub(1, Ordering::SeqCst);

    let response = match pages.get(&route) {
        Some(body) => format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/html; charset=utf-8\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        ),
        None => "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string(),
    };
    stream.write_all(response.as_bytes()).await.is_ok() && stream.shutdown().await.is_ok()
}
