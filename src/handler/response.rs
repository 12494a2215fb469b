//! Worker response chunks to transport writes.

use std::collections::HashMap;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use serde::Deserialize;

use crate::handler::error::HandlerError;
use crate::handler::recycle::Recycle;
use crate::handler::writer::ResponseWriter;
use crate::handler::Handler;
use crate::pool::{Codec, Payload};

/// Header listing header names that are sent as trailers.
pub const TRAILER: &str = "Trailer";
/// Header listing paths to push over HTTP/2.
pub const HTTP2_PUSH: &str = "Http2-Push";
/// Prefix marking a header as a trailer.
pub const TRAILER_PREFIX: &str = "Trailer:";

/// Response head sent by a worker.
#[derive(Debug)]
pub struct Response {
    pub status: i64,
    pub headers: HashMap<String, Vec<String>>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: -1,
            headers: HashMap::new(),
        }
    }
}

impl Recycle for Response {
    fn recycle(&mut self) {
        self.status = -1;
        self.headers.clear();
    }
}

#[derive(Deserialize)]
struct ResponseContext {
    status: i64,
    #[serde(default)]
    headers: Option<HashMap<String, Vec<String>>>,
}

impl Response {
    pub fn decode(&mut self, codec: Codec, context: &[u8]) -> Result<(), HandlerError> {
        if codec != Codec::Json {
            return Err(HandlerError::UnsupportedCodec(codec));
        }
        let decoded: ResponseContext =
            serde_json::from_slice(context).map_err(HandlerError::Decode)?;

        self.status = decoded.status;
        self.headers.clear();
        self.headers.extend(decoded.headers.unwrap_or_default());
        Ok(())
    }

    /// Validated status code.
    pub fn status_code(&self) -> Result<StatusCode, HandlerError> {
        if !(100..600).contains(&self.status) {
            return Err(HandlerError::InvalidStatus(self.status));
        }
        u16::try_from(self.status)
            .ok()
            .and_then(|status| StatusCode::from_u16(status).ok())
            .ok_or(HandlerError::InvalidStatus(self.status))
    }

    /// Remove a header, matching its name case-insensitively.
    pub fn take_header(&mut self, name: &str) -> Option<Vec<String>> {
        let key = self
            .headers
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))?
            .clone();
        self.headers.remove(&key)
    }

    /// Move headers announced in `Trailer` under the trailer prefix.
    pub fn handle_trailers(&mut self) {
        let Some(announced) = self.take_header(TRAILER) else {
            return;
        };

        for value in announced {
            for name in value.split(',').map(|name| name.trim_matches([' ', '\t'])) {
                if name.is_empty() {
                    continue;
                }
                if let Some(values) = self.take_header(name) {
                    self.headers.insert(format!("{TRAILER_PREFIX}{name}"), values);
                }
            }
        }
    }

    /// Copy headers to the writer; prefixed ones become trailers.
    pub fn apply<W: ResponseWriter>(&self, writer: &mut W) {
        for (key, values) in &self.headers {
            let (name, trailer) = match key.strip_prefix(TRAILER_PREFIX) {
                Some(name) => (name, true),
                None => (key.as_str(), false),
            };
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(header = %key, "dropping invalid header name from worker");
                continue;
            };

            let target = if trailer {
                writer.trailers_mut()
            } else {
                writer.headers_mut()
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        target.append(name.clone(), value);
                    }
                    Err(_) => tracing::warn!(header = %key, "dropping invalid header value from worker"),
                }
            }
        }
    }
}

impl Handler {
    /// Write one worker chunk to the client.
    ///
    /// Returns the committed status when the chunk carried a head.
    pub(crate) async fn write_chunk<W: ResponseWriter>(
        &self,
        chunk: &mut Payload,
        writer: &mut W,
    ) -> Result<Option<StatusCode>, HandlerError> {
        let mut committed = None;

        if !chunk.context.is_empty() {
            let mut response = self.responses.acquire();
            response.decode(chunk.codec, &chunk.context)?;

            // The caller answers an invalid status with a 500 while headers are unsent.
            let status = response.status_code()?;

            if let Some(targets) = response.take_header(HTTP2_PUSH) {
                if writer.supports_push() {
                    for target in &targets {
                        writer.push(target).map_err(HandlerError::Push)?;
                    }
                }
            }

            response.handle_trailers();
            response.apply(writer);
            writer.write_header(status);
            committed = Some(status);
        }

        if chunk.body.is_empty() {
            return Ok(committed);
        }

        writer
            .write(chunk.body.split().freeze())
            .await
            .map_err(HandlerError::Write)?;
        writer.flush().map_err(HandlerError::Write)?;
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::writer::Recorder;

    fn decoded(context: &str) -> Response {
        let mut response = Response::default();
        response.decode(Codec::Json, context.as_bytes()).unwrap();
        response
    }

    #[test]
    fn status_range_is_validated() {
        assert_eq!(decoded(r#"{"status":200}"#).status_code().unwrap(), StatusCode::OK);
        assert_eq!(decoded(r#"{"status":103}"#).status_code().unwrap().as_u16(), 103);
        assert!(matches!(
            decoded(r#"{"status":777}"#).status_code(),
            Err(HandlerError::InvalidStatus(777))
        ));
        assert!(decoded(r#"{"status":99}"#).status_code().is_err());
        assert!(decoded(r#"{"status":-5}"#).status_code().is_err());
    }

    #[test]
    fn null_headers_decode_as_empty() {
        let response = decoded(r#"{"status":204,"headers":null}"#);
        assert!(response.headers.is_empty());
    }

    #[test]
    fn raw_codec_cannot_decode() {
        let err = Response::default().decode(Codec::Raw, b"{}").unwrap_err();
        assert!(matches!(err, HandlerError::UnsupportedCodec(Codec::Raw)));
    }

    #[test]
    fn announced_headers_move_to_trailers() {
        let mut response = decoded(
            r#"{"status":200,"headers":{"Trailer":["Checksum, Expires"],"Checksum":["abc"],"Content-Type":["text/plain"]}}"#,
        );
        response.handle_trailers();

        assert!(response.headers.get(TRAILER).is_none());
        assert!(response.headers.get("Checksum").is_none());
        assert_eq!(response.headers["Trailer:Checksum"], vec!["abc"]);
        assert!(response.headers.get("Trailer:Expires").is_none());

        let mut recorder = Recorder::new();
        response.apply(&mut recorder);
        assert_eq!(recorder.trailers.get("checksum").unwrap(), "abc");
        assert_eq!(recorder.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn invalid_header_values_are_dropped() {
        let response = decoded(r#"{"status":200,"headers":{"X-Bad":["a\nb"],"X-Good":["ok"]}}"#);
        let mut recorder = Recorder::new();
        response.apply(&mut recorder);
        assert!(recorder.headers.get("x-bad").is_none());
        assert_eq!(recorder.header("x-good"), Some("ok"));
    }
}
