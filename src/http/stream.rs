//! axum adapter for [`ResponseWriter`].
//!
//! The response head travels through a oneshot once a final status is
//! committed; body chunks and trailers follow over a bounded channel that
//! backs the streaming body. A closed channel means the client is gone.

use std::future::Future;
use std::io;
use std::mem;

use axum::body::Body;
use axum::http::header::TRAILER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use http_body_util::StreamBody;
use hyper::body::Frame;
use tokio::sync::{mpsc, oneshot};

use crate::handler::ResponseWriter;

const FRAME_BUFFER: usize = 16;

type FrameResult = Result<Frame<Bytes>, io::Error>;

pub struct StreamWriter {
    headers: HeaderMap,
    trailers: HeaderMap,
    head: Option<oneshot::Sender<Response>>,
    frames: Option<mpsc::Sender<FrameResult>>,
    body: Option<mpsc::Receiver<FrameResult>>,
}

impl StreamWriter {
    /// Create a writer and the receiver that yields the response head.
    pub fn new() -> (Self, oneshot::Receiver<Response>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let writer = Self {
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            head: Some(head_tx),
            frames: Some(frames_tx),
            body: Some(frames_rx),
        };
        (writer, head_rx)
    }

    fn commit(&mut self, status: StatusCode) {
        let (Some(head), Some(frames)) = (self.head.take(), self.body.take()) else {
            return;
        };

        if !self.trailers.is_empty() {
            let names = self
                .trailers
                .keys()
                .map(|name| name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&names) {
                self.headers.insert(TRAILER, value);
            }
        }

        let stream = futures_util::stream::unfold(frames, |mut frames| async move {
            frames.recv().await.map(|frame| (frame, frames))
        });
        let mut response = Response::new(Body::new(StreamBody::new(stream)));
        *response.status_mut() = status;
        *response.headers_mut() = mem::take(&mut self.headers);

        if head.send(response).is_err() {
            tracing::debug!("client went away before the response head was sent");
            self.frames = None;
        }
    }

    async fn send(&mut self, frame: Frame<Bytes>) -> io::Result<()> {
        let Some(frames) = &self.frames else {
            return Err(broken_pipe());
        };
        frames.send(Ok(frame)).await.map_err(|_| broken_pipe())
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "client connection closed")
}

impl ResponseWriter for StreamWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn trailers_mut(&mut self) -> &mut HeaderMap {
        &mut self.trailers
    }

    fn headers_sent(&self) -> bool {
        self.head.is_none()
    }

    fn write_header(&mut self, status: StatusCode) {
        // 1xx heads are folded into the final response.
        if status.is_informational() {
            return;
        }
        self.commit(status);
    }

    fn write(&mut self, chunk: Bytes) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            if self.head.is_some() {
                self.commit(StatusCode::OK);
            }
            self.send(Frame::data(chunk)).await
        }
    }

    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        async move {
            if self.head.is_some() {
                self.commit(StatusCode::OK);
            }
            let result = if self.trailers.is_empty() {
                Ok(())
            } else {
                let trailers = mem::take(&mut self.trailers);
                self.send(Frame::trailers(trailers)).await
            };
            self.frames = None;
            result
        }
    }
}
