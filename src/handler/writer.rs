//! Transport-side response sink.
//!
//! The handler writes through [`ResponseWriter`] only, so the same flow runs
//! against the axum streaming adapter and the in-memory [`Recorder`].

use std::future::Future;
use std::io;

use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::{Bytes, BytesMut};

/// Streaming HTTP response sink.
///
/// Informational (1xx) statuses are recorded without committing; headers set
/// before them stay in place for the final response. Once a final status is
/// committed, further `write_header` calls are ignored.
pub trait ResponseWriter: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Trailers are sent after the body.
    fn trailers_mut(&mut self) -> &mut HeaderMap;

    /// True once a final status has been committed.
    fn headers_sent(&self) -> bool;

    fn write_header(&mut self, status: StatusCode);

    /// Write a body chunk, committing `200 OK` first if needed.
    fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn supports_push(&self) -> bool {
        false
    }

    fn push(&mut self, target: &str) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("server push of {target} is not supported"),
        ))
    }

    /// Commit anything pending and send trailers.
    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Write a plain-text error response.
pub async fn write_error<W: ResponseWriter>(
    writer: &mut W,
    status: StatusCode,
    message: &str,
) -> io::Result<()> {
    let headers = writer.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    writer.write_header(status);
    writer.write(Bytes::from(format!("{message}\n"))).await
}

/// In-memory writer capturing everything the handler produces.
#[derive(Debug, Default)]
pub struct Recorder {
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
    pub status: Option<StatusCode>,
    pub informational: Vec<StatusCode>,
    pub body: BytesMut,
    pub flushes: usize,
    pub pushed: Vec<String>,
    pub finished: bool,
    /// Number of successful writes.
    pub writes: usize,
    push_enabled: bool,
    fail_after: Option<usize>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_push(mut self) -> Self {
        self.push_enabled = true;
        self
    }

    /// Fail every write after the first `writes` succeed.
    pub fn fail_after(mut self, writes: usize) -> Self {
        self.fail_after = Some(writes);
        self
    }

    /// Committed status, or 200 when nothing was committed.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    fn write_sync(&mut self, chunk: Bytes) -> io::Result<()> {
        if self.fail_after.is_some_and(|limit| self.writes >= limit) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"));
        }
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.writes += 1;
        self.body.extend_from_slice(&chunk);
        Ok(())
    }
}

impl ResponseWriter for Recorder {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn trailers_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailers
    }

    fn headers_sent(&self) -> bool {
        self.status.is_some()
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_some() {
            return;
        }
        if status.is_informational() {
            self.informational.push(status);
        } else {
            self.status = Some(status);
        }
    }

    fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send {
        std::future::ready(self.write_sync(chunk))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flushes += 1;
        Ok(())
    }

    fn supports_push(&self) -> bool {
        self.push_enabled
    }

    fn push(&mut self, target: &str) -> io::Result<()> {
        if !self.push_enabled {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "push disabled"));
        }
        self.pushed.push(target.to_owned());
        Ok(())
    }

    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.finished = true;
        std::future::ready(Ok(()))
    }
}
