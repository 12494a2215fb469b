use std::io;

use http_body_util::LengthLimitError;
use thiserror::Error;

use crate::handler::tree::TreeError;
use crate::pool::{Codec, PoolError};

/// Failures along the request/response path of the gateway handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to read request body: {0}")]
    Body(#[source] axum::Error),

    #[error("malformed multipart form: {0}")]
    Multipart(#[from] multer::Error),

    #[error("failed to spool uploaded file: {0}")]
    Spool(#[source] io::Error),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("codec {0} does not support structured payloads")]
    UnsupportedCodec(Codec),

    #[error("failed to encode request context: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode response context: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("request body type does not match the forwarding mode")]
    BodyMismatch,

    #[error("unknown status code from worker: {0}")]
    InvalidStatus(i64),

    #[error("http/2 push failed: {0}")]
    Push(#[source] io::Error),

    #[error("client write failed: {0}")]
    Write(#[source] io::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl HandlerError {
    /// True for failures while reading or parsing the request body.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            HandlerError::Body(_)
                | HandlerError::Multipart(_)
                | HandlerError::Spool(_)
                | HandlerError::Tree(_)
        )
    }

    /// True when the client connection went away mid-response.
    pub fn is_client_gone(&self) -> bool {
        matches!(self, HandlerError::Write(_))
    }

    /// True when the body hit the configured size limit.
    pub fn is_payload_too_large(&self) -> bool {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = source {
            if err.is::<LengthLimitError>() {
                return true;
            }
            source = err.source();
        }
        false
    }
}
