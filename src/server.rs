//! Static asset server for the single-page client.
//!
//! One fallback route: any path that does not resolve to a file under the
//! public directory gets `index.html`, so client-side routes survive a
//! reload. No API endpoints; all session coordination happens client-to-
//! mailbox directly.

use crate::config::HttpConfig;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub struct StaticServer {
    config: HttpConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl StaticServer {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
        }
    }

    /// Binds and starts serving in the background. Returns the bound
    /// address (useful with port 0).
    pub async fn start(&mut self) -> io::Result<SocketAddr> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_addr, self.config.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);
        let public_dir = self.config.public_dir.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let dir = public_dir.clone();
                                tokio::spawn(async move {
                                    let service = service_fn(move |req| {
                                        let dir = dir.clone();
                                        async move { handle_request(req, &dir).await }
                                    });
                                    if let Err(e) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("connection error: {e}");
                                    }
                                });
                            }
                            Err(e) => warn!("accept error: {e}"),
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            info!("static server stopped");
        });

        Ok(local_addr)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_request(
    req: Request<Incoming>,
    public_dir: &Path,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Ok(plain_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed",
        ));
    }

    if let Some(rel) = resolve_path(req.uri().path()) {
        let full = public_dir.join(&rel);
        if let Ok(body) = tokio::fs::read(&full).await {
            return Ok(file_response(&rel, body));
        }
    }

    // SPA fallback: unmatched paths get the client entry point
    match tokio::fs::read(public_dir.join("index.html")).await {
        Ok(body) => Ok(file_response(Path::new("index.html"), body)),
        Err(e) => {
            warn!("client bundle missing: {e}");
            Ok(plain_response(
                StatusCode::NOT_FOUND,
                "client bundle not found",
            ))
        }
    }
}

/// Maps a request path to a relative file path. Anything that is not a plain
/// chain of normal components (e.g. `..`) is refused.
fn resolve_path(uri_path: &str) -> Option<PathBuf> {
    let trimmed = uri_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Some(PathBuf::from("index.html"));
    }
    let path = Path::new(trimmed);
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "text/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn file_response(path: &Path, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type(path))
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn plain_response(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(text)))
        .unwrap()
}
