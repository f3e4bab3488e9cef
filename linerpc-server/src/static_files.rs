//! Static file responder over HTTP/1.1.
//!
//! Answers one request per connection and closes it. Only `GET` and `HEAD`
//! are served; `POST` is refused with 403 and every other method with 405.
//! Error responses carry no body.

use crate::error::ServerError;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

/// Upper bound on the buffered request line plus headers.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Serves files below a root directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Serves a single HTTP exchange on `stream`, then closes it.
    ///
    /// A peer that closes before sending a request is not an error. Malformed
    /// requests are answered with 400 by the HTTP layer and reported as
    /// [`ServerError::Http`].
    pub async fn serve<S>(&self, stream: S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let io = TokioIo::new(stream);
        let service = service_fn(|req| self.handle(req));
        http1::Builder::new()
            .keep_alive(false)
            .title_case_headers(true)
            .max_buf_size(MAX_HEAD_SIZE)
            .serve_connection(io, service)
            .await?;
        Ok(())
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        tracing::info!("{} {}", req.method(), req.uri());

        // Method first, so POST to a missing path is still 403
        let head_only = match req.method() {
            &Method::GET => false,
            &Method::HEAD => true,
            &Method::POST => return Ok(empty_response(StatusCode::FORBIDDEN)),
            _ => return Ok(empty_response(StatusCode::METHOD_NOT_ALLOWED)),
        };

        let target = req.uri().path().to_owned();
        let path = match self.resolve(&target).await {
            Some(path) => path,
            None => return Ok(empty_response(StatusCode::NOT_FOUND)),
        };

        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                tracing::debug!("Cannot read {}: {}", path.display(), e);
                return Ok(empty_response(StatusCode::NOT_FOUND));
            }
        };
        tracing::debug!("Serving {} ({} bytes)", path.display(), contents.len());

        let length = contents.len();
        let body = if head_only {
            Bytes::new()
        } else {
            Bytes::from(contents)
        };
        Ok(file_response(content_type(&path), length, body))
    }

    /// Maps a request path to a regular file under the root.
    ///
    /// Paths that climb above the root, missing files, and directories
    /// without an `index.html` yield `None`.
    async fn resolve(&self, path: &str) -> Option<PathBuf> {
        if !path.starts_with('/') {
            return None;
        }

        let mut relative = PathBuf::new();
        for component in Path::new(path).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(segment) => relative.push(segment),
                Component::ParentDir => {
                    if !relative.pop() {
                        return None;
                    }
                }
                Component::Prefix(_) => return None,
            }
        }

        let mut full = self.root.join(relative);
        let mut metadata = tokio::fs::metadata(&full).await.ok()?;
        if metadata.is_dir() {
            full.push("index.html");
            metadata = tokio::fs::metadata(&full).await.ok()?;
        }
        metadata.is_file().then_some(full)
    }
}

fn file_response(content_type: &'static str, length: usize, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    // Set explicitly so HEAD reports the file size with an empty body
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = file_response("text/html", 0, Bytes::new());
    *response.status_mut() = status;
    response
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
