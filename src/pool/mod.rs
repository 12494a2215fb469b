//! Worker pool capability.
//!
//! # Data Flow
//! ```text
//! Gateway handler
//!     → Payload (context + body, codec tag)
//!     → SharedPool::exec (read lock, blocks until a worker is allocated)
//!     → ExecStream: Result<Payload, PoolError> chunks
//!         - chunk with non-empty context: response head (status + headers)
//!         - chunk with empty context: body fragment
//!     → StopSignal (per request, capacity one) asks the pool to stop the worker
//!
//! Management (admin API):
//!     reset / add_worker / remove_worker → SharedPool (write lock)
//! ```
//!
//! # Design Decisions
//! - The pool is an injected capability; the gateway never talks to worker
//!   processes directly and never kills one itself
//! - Reset blocks new dispatches but leaves already-streaming responses alone
//! - Stop signals are at-least-once: a pending signal absorbs further sends

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock};

/// Serialization format of a payload's structured segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Opaque bytes; structured encode/decode is not possible.
    Raw,
    /// JSON encoded context and parsed body.
    #[default]
    Json,
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Raw => f.write_str("raw"),
            Codec::Json => f.write_str("json"),
        }
    }
}

/// The unit exchanged with a worker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Request or response metadata, encoded with `codec`.
    pub context: BytesMut,
    /// Body bytes.
    pub body: BytesMut,
    pub codec: Codec,
}

impl Payload {
    /// Build a JSON payload from raw context and body bytes.
    pub fn json(context: impl AsRef<[u8]>, body: impl AsRef<[u8]>) -> Self {
        Self {
            context: BytesMut::from(context.as_ref()),
            body: BytesMut::from(body.as_ref()),
            codec: Codec::Json,
        }
    }

    /// Build a body-only chunk of a streamed response.
    pub fn chunk(body: impl AsRef<[u8]>) -> Self {
        Self::json(b"", body)
    }
}

/// Failures reported by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no free workers in the pool")]
    NoFreeWorkers,
    #[error("worker allocation timed out")]
    WorkerAllocate,
    #[error("worker exec ttl reached")]
    ExecTtl,
    #[error("worker idle ttl reached")]
    IdleTtl,
    #[error("worker ttl reached")]
    Ttl,
    #[error("{0}")]
    SoftJob(String),
    #[error("worker watcher stopped")]
    WatcherStopped,
    #[error("worker network error: {0}")]
    Network(String),
    #[error("payload encode error: {0}")]
    Encode(String),
    #[error("payload decode error: {0}")]
    Decode(String),
}

impl PoolError {
    /// True when the pool had no capacity to take the request.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, PoolError::NoFreeWorkers)
    }
}

/// Stream of response chunks produced by one exec call.
pub type ExecStream = mpsc::Receiver<Result<Payload, PoolError>>;

/// Per-request cooperative cancellation channel with a single buffered slot.
///
/// Clones share the same slot: the gateway keeps one handle, the pool gets
/// the other.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    pending: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a stop request without blocking.
    ///
    /// Returns `false` when a previous request is still pending.
    pub fn stop(&self) -> bool {
        if self.inner.pending.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.notify.notify_one();
        true
    }

    /// Consume a pending stop request, if any.
    pub fn try_recv(&self) -> bool {
        self.inner.pending.swap(false, Ordering::AcqRel)
    }

    /// Wait until a stop request arrives and consume it.
    pub async fn recv(&self) {
        loop {
            if self.try_recv() {
                return;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Drop any pending request so the slot can be reused.
    pub(crate) fn drain(&self) {
        self.inner.pending.store(false, Ordering::Release);
    }

    /// True when no other handle to this channel is alive.
    pub(crate) fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }
}

/// Lifecycle state of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Inactive,
    Ready,
    Working,
    Invalid,
    Stopping,
    Stopped,
    Errored,
    Destroyed,
}

impl WorkerStatus {
    /// Ready or currently executing a request.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerStatus::Ready | WorkerStatus::Working)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, WorkerStatus::Ready)
    }
}

/// Snapshot of one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessState {
    pub pid: u32,
    pub status: WorkerStatus,
    pub num_execs: u64,
    /// Creation time, unix milliseconds.
    pub created: u64,
    /// Resident memory in bytes.
    pub memory_usage: u64,
}

/// Capability exposed by the worker pool.
///
/// `exec` must have handed the payload to a worker before its future
/// resolves; the caller recycles the payload once the stream is drained.
pub trait WorkerPool: Send + Sync + 'static {
    fn exec<'a>(
        &'a self,
        payload: &'a Payload,
        stop: StopSignal,
    ) -> BoxFuture<'a, Result<ExecStream, PoolError>>;

    fn workers(&self) -> Vec<ProcessState>;

    fn add_worker(&self) -> BoxFuture<'_, Result<(), PoolError>>;

    fn remove_worker(&self) -> BoxFuture<'_, Result<(), PoolError>>;

    fn reset(&self) -> BoxFuture<'_, Result<(), PoolError>>;
}

/// Worker pool guarded by the dispatch lock.
///
/// Dispatch holds the lock for reading only until the pool hands back a
/// stream; management operations hold it for writing.
pub struct SharedPool {
    inner: RwLock<Arc<dyn WorkerPool>>,
}

impl SharedPool {
    pub fn new(pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            inner: RwLock::new(pool),
        }
    }

    pub async fn exec(&self, payload: &Payload, stop: StopSignal) -> Result<ExecStream, PoolError> {
        let pool = self.inner.read().await;
        pool.exec(payload, stop).await
    }

    pub async fn workers(&self) -> Vec<ProcessState> {
        self.inner.read().await.workers()
    }

    pub async fn add_worker(&self) -> Result<(), PoolError> {
        let pool = self.inner.write().await;
        pool.add_worker().await
    }

    pub async fn remove_worker(&self) -> Result<(), PoolError> {
        let pool = self.inner.write().await;
        pool.remove_worker().await
    }

    pub async fn reset(&self) -> Result<(), PoolError> {
        let pool = self.inner.write().await;
        tracing::info!("reset signal was received");
        pool.reset().await?;
        tracing::info!("worker pool was successfully reset");
        Ok(())
    }
}

impl fmt::Debug for SharedPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPool").finish_non_exhaustive()
    }
}
