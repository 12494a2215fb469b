//! Per-request log lines.

use std::time::Instant;

use axum::http::header::{CONTENT_LENGTH, REFERER, USER_AGENT};
use axum::http::request::Parts;
use axum::http::StatusCode;

use crate::handler::{Request, Stage};

/// Fields of a completed request.
#[derive(Debug)]
pub struct AccessLog<'a> {
    request: &'a Request,
    parts: &'a Parts,
    status: StatusCode,
    elapsed_ms: u64,
}

impl<'a> AccessLog<'a> {
    pub fn new(request: &'a Request, parts: &'a Parts, status: StatusCode, start: Instant) -> Self {
        Self {
            request,
            parts,
            status,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn header(&self, name: impl axum::http::header::AsHeaderName) -> &str {
        self.parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    /// Method, URI, status, remote address and timing.
    pub fn emit(&self) {
        tracing::info!(
            stage = %Stage::Done,
            method = %self.request.method,
            uri = %self.request.uri,
            status = self.status.as_u16(),
            remote_address = %self.request.remote_addr,
            elapsed_ms = self.elapsed_ms,
            "http log"
        );
    }

    /// Everything from [`emit`](Self::emit) plus protocol and client details.
    pub fn emit_extended(&self) {
        tracing::info!(
            stage = %Stage::Done,
            method = %self.request.method,
            uri = %self.request.uri,
            status = self.status.as_u16(),
            remote_address = %self.request.remote_addr,
            elapsed_ms = self.elapsed_ms,
            protocol = %self.request.protocol,
            host = self.parts.uri.host().unwrap_or_else(|| self.header("host")),
            path = self.parts.uri.path(),
            query = %self.request.raw_query,
            user_agent = self.header(USER_AGENT),
            referer = self.header(REFERER),
            content_length = self.header(CONTENT_LENGTH),
            "http access log"
        );
    }
}
