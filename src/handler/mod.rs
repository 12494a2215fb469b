//! Gateway request handler.
//!
//! # Data Flow
//! ```text
//! HTTP request (axum)
//!     → request.rs (metadata, trusted remote address, cookies, attributes)
//!     → parse.rs (raw body | urlencoded form | multipart form + spooled files)
//!     → uploads.rs (extension policy, staging, ownership)
//!     → request.rs (encode context + body into a pooled Payload)
//!     → SharedPool::exec (blocks until a worker is allocated)
//!     → response.rs (per chunk: head → headers/status, body → write + flush)
//!     → writer.rs (transport sink)
//!     → cleanup (uploads removed, pooled objects released)
//! ```
//!
//! # Design Decisions
//! - One request's objects are pooled and released exactly once on every path
//! - A failed client write sends one stop signal and drains the stream
//! - Once headers are committed, errors are logged instead of written
//! - Internal error details reach the client only in debug mode

pub mod error;
pub mod parse;
pub mod recycle;
pub mod request;
pub mod response;
pub mod tree;
pub mod uploads;
pub mod writer;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request as HttpRequest, StatusCode};

use crate::config::GatewayConfig;
use crate::http::access_log::AccessLog;
use crate::observability::metrics;
use crate::pool::{ExecStream, Payload, PoolError, SharedPool, StopSignal};
use crate::security::TrustedResolver;

pub use error::HandlerError;
pub use request::{Request, RequestBody, Secure};
pub use response::Response;
pub use uploads::{FileUpload, UploadError, UploadPolicy, Uploads};
pub use writer::{Recorder, ResponseWriter};

use parse::ContentKind;
use recycle::ObjectPool;

/// Header set on dispatch failures caused by pool exhaustion.
pub const NO_WORKERS: &str = "no-workers";

const POOLED_OBJECTS: usize = 1024;

/// Request lifecycle stage, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    BuildingRequest,
    AwaitingPool,
    StreamingResponse,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Stage::BuildingRequest => "building_request",
            Stage::AwaitingPool => "awaiting_pool",
            Stage::StreamingResponse => "streaming_response",
            Stage::Done => "done",
        };
        f.write_str(stage)
    }
}

pub struct Handler {
    pool: Arc<SharedPool>,
    policy: UploadPolicy,
    trusted: TrustedResolver,
    internal_error_code: StatusCode,
    raw_body: bool,
    debug: bool,
    access_logs: bool,
    requests: ObjectPool<Request>,
    responses: ObjectPool<Response>,
    payloads: ObjectPool<Payload>,
    stops: ObjectPool<StopSignal>,
}

impl Handler {
    pub fn new(config: &GatewayConfig, pool: Arc<SharedPool>) -> Self {
        let internal_error_code = StatusCode::from_u16(config.http.internal_error_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        Self {
            pool,
            policy: UploadPolicy::from_config(config),
            trusted: TrustedResolver::new(config.http.trusted_subnets.clone()),
            internal_error_code,
            raw_body: config.http.raw_body,
            debug: config.http.debug,
            access_logs: config.http.access_logs,
            requests: ObjectPool::new(POOLED_OBJECTS),
            responses: ObjectPool::new(POOLED_OBJECTS),
            payloads: ObjectPool::new(POOLED_OBJECTS),
            stops: ObjectPool::new(POOLED_OBJECTS),
        }
    }

    pub fn pool(&self) -> &Arc<SharedPool> {
        &self.pool
    }

    /// Serve one request through the worker pool.
    ///
    /// Errors are written to the client while that is still possible and
    /// returned for logging; the writer is left for the caller to finish.
    pub async fn serve<W: ResponseWriter>(
        &self,
        request: HttpRequest<Body>,
        peer: SocketAddr,
        writer: &mut W,
    ) -> Result<StatusCode, HandlerError> {
        let start = Instant::now();
        let (mut parts, body) = request.into_parts();

        let mut req = self.requests.acquire();
        req.fill(&mut parts, peer, &self.trusted);

        if let Err(err) = self.read_body(&mut req, &parts, body).await {
            req.close_uploads();
            let status = if err.is_payload_too_large() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else if err.is_parse_error() {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                self.internal_error_code
            };
            self.log_failure(&req, Stage::BuildingRequest, &err, start);
            metrics::record_request(&req.method, status.as_u16(), start);
            self.write_internal(writer, status, &err).await;
            return Err(err);
        }
        req.open_uploads(&self.policy).await;

        let mut payload = self.payloads.acquire();
        if let Err(err) = req.encode(&mut payload, self.raw_body) {
            self.log_failure(&req, Stage::BuildingRequest, &err, start);
            metrics::record_request(&req.method, self.internal_error_code.as_u16(), start);
            self.write_internal(writer, self.internal_error_code, &err).await;
            return Err(err);
        }

        let stop = self.stops.acquire();
        let stream = match self.pool.exec(&payload, stop.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                self.write_pool_error(writer, &err).await;
                let err = HandlerError::Pool(err);
                self.log_failure(&req, Stage::AwaitingPool, &err, start);
                metrics::record_request(&req.method, self.internal_error_code.as_u16(), start);
                return Err(err);
            }
        };

        let (status, outcome) = self.stream_response(stream, &stop, writer).await;
        metrics::record_request(&req.method, status.as_u16(), start);

        match outcome {
            None => {
                self.log_access(&req, &parts, status, start);
                Ok(status)
            }
            Some(err) => {
                self.log_failure(&req, Stage::StreamingResponse, &err, start);
                Err(err)
            }
        }
    }

    async fn read_body(
        &self,
        req: &mut Request,
        parts: &Parts,
        body: Body,
    ) -> Result<(), HandlerError> {
        match parse::content_kind(&parts.method, &parts.headers) {
            ContentKind::None => {}
            ContentKind::Stream => {
                req.body = RequestBody::Raw(parse::read_all(body).await?);
            }
            _ if self.raw_body => {
                req.body = RequestBody::Raw(parse::read_all(body).await?);
            }
            ContentKind::UrlEncoded => {
                let bytes = parse::read_all(body).await?;
                req.body = RequestBody::Form(parse::parse_urlencoded(&bytes)?);
                req.parsed = true;
            }
            ContentKind::Multipart => {
                let content_type = parts
                    .headers
                    .get(CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default();
                let form = parse::parse_multipart(body, content_type, &self.policy.dir).await?;
                req.uploads = Some(form.uploads);
                req.body = RequestBody::Form(form.data);
                req.parsed = true;
            }
        }
        Ok(())
    }

    /// Forward every chunk; after a failure the rest of the stream is drained
    /// without writing.
    async fn stream_response<W: ResponseWriter>(
        &self,
        mut stream: ExecStream,
        stop: &StopSignal,
        writer: &mut W,
    ) -> (StatusCode, Option<HandlerError>) {
        let mut status = None;
        let mut failure = None;

        while let Some(item) = stream.recv().await {
            if failure.is_some() {
                continue;
            }

            match item {
                Ok(mut chunk) => match self.write_chunk(&mut chunk, writer).await {
                    Ok(Some(committed)) => status = Some(committed),
                    Ok(None) => {}
                    Err(err) => {
                        if err.is_client_gone() {
                            metrics::record_stream_cancellation();
                            tracing::warn!(error = %err, "client write failed, stopping worker stream");
                        } else if self
                            .write_internal(writer, StatusCode::INTERNAL_SERVER_ERROR, &err)
                            .await
                        {
                            status = Some(StatusCode::INTERNAL_SERVER_ERROR);
                        }
                        stop.stop();
                        failure = Some(err);
                    }
                },
                Err(err) => {
                    if writer.headers_sent() {
                        tracing::error!(error = %err, "worker failed after response headers were sent");
                    } else if self.write_pool_error(writer, &err).await {
                        status = Some(self.internal_error_code);
                    }
                    failure = Some(HandlerError::Pool(err));
                }
            }
        }

        (status.unwrap_or(StatusCode::OK), failure)
    }

    async fn write_pool_error<W: ResponseWriter>(&self, writer: &mut W, err: &PoolError) -> bool {
        if err.is_resource_exhausted() {
            metrics::record_no_free_workers();
            if !writer.headers_sent() {
                writer
                    .headers_mut()
                    .insert(NO_WORKERS, HeaderValue::from_static("true"));
            }
        }
        self.write_internal(writer, self.internal_error_code, err).await
    }

    /// Write an error response unless headers are already out.
    ///
    /// Returns whether the error status was committed.
    async fn write_internal<W: ResponseWriter, E: fmt::Display>(
        &self,
        writer: &mut W,
        status: StatusCode,
        err: &E,
    ) -> bool {
        if writer.headers_sent() {
            return false;
        }
        let message = if self.debug {
            err.to_string()
        } else {
            status.canonical_reason().unwrap_or("Internal Server Error").to_owned()
        };
        if let Err(err) = writer::write_error(writer, status, &message).await {
            tracing::debug!(error = %err, "failed to write error response");
        }
        true
    }

    fn log_access(&self, req: &Request, parts: &Parts, status: StatusCode, start: Instant) {
        let entry = AccessLog::new(req, parts, status, start);
        if self.access_logs {
            entry.emit_extended();
        } else {
            entry.emit();
        }
    }

    fn log_failure(&self, req: &Request, stage: Stage, err: &HandlerError, start: Instant) {
        tracing::error!(
            stage = %stage,
            method = %req.method,
            uri = %req.uri,
            remote_address = %req.remote_addr,
            elapsed_ms = start.elapsed().as_millis() as u64,
            error = %err,
            "request failed"
        );
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("raw_body", &self.raw_body)
            .field("debug", &self.debug)
            .field("internal_error_code", &self.internal_error_code)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::{self, BoxFuture};
    use futures_util::FutureExt;
    use tokio::sync::mpsc;

    use crate::pool::{ProcessState, WorkerPool};

    /// Pool that never dispatches; streams are fed directly.
    struct Unused;

    impl WorkerPool for Unused {
        fn exec<'a>(
            &'a self,
            _payload: &'a Payload,
            _stop: StopSignal,
        ) -> BoxFuture<'a, Result<ExecStream, PoolError>> {
            future::ready(Err(PoolError::NoFreeWorkers)).boxed()
        }

        fn workers(&self) -> Vec<ProcessState> {
            Vec::new()
        }

        fn add_worker(&self) -> BoxFuture<'_, Result<(), PoolError>> {
            future::ready(Ok(())).boxed()
        }

        fn remove_worker(&self) -> BoxFuture<'_, Result<(), PoolError>> {
            future::ready(Ok(())).boxed()
        }

        fn reset(&self) -> BoxFuture<'_, Result<(), PoolError>> {
            future::ready(Ok(())).boxed()
        }
    }

    fn handler() -> Handler {
        let pool: Arc<dyn WorkerPool> = Arc::new(Unused);
        Handler::new(&GatewayConfig::default(), Arc::new(SharedPool::new(pool)))
    }

    fn stream(items: Vec<Result<Payload, PoolError>>) -> ExecStream {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn invalid_status_is_committed_as_500() {
        let handler = handler();
        let mut writer = Recorder::new();
        let stop = StopSignal::new();

        let head = Payload::json(r#"{"status":777,"headers":{"X-Leak":["no"]}}"#, "body");
        let (status, err) = handler
            .stream_response(stream(vec![Ok(head)]), &stop, &mut writer)
            .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(writer.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(err, Some(HandlerError::InvalidStatus(777))));
        assert!(writer.header("x-leak").is_none());
        assert_eq!(writer.body_text(), "Internal Server Error\n");
        assert!(stop.try_recv(), "worker is asked to stop once");
    }

    #[tokio::test]
    async fn invalid_status_after_commit_keeps_sent_status() {
        let handler = handler();
        let mut writer = Recorder::new();
        let stop = StopSignal::new();

        let items = vec![
            Ok(Payload::json(r#"{"status":201}"#, "partial")),
            Ok(Payload::json(r#"{"status":777}"#, "")),
        ];
        let (status, err) = handler.stream_response(stream(items), &stop, &mut writer).await;

        assert_eq!(status, StatusCode::CREATED);
        assert!(matches!(err, Some(HandlerError::InvalidStatus(777))));
        assert_eq!(writer.body_text(), "partial");
    }
}
