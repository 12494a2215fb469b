//! Shared utilities for gateway integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::Request;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use worker_gateway::pool::{
    ExecStream, Payload, PoolError, ProcessState, SharedPool, StopSignal, WorkerPool, WorkerStatus,
};
use worker_gateway::{GatewayConfig, Handler};

pub const BOUNDARY: &str = "gateway-test-boundary";

/// What the worker saw.
#[derive(Debug, Clone)]
pub struct Captured {
    pub context: Value,
    pub body: Vec<u8>,
}

impl Captured {
    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("worker body is JSON")
    }
}

type Inspector = Arc<dyn Fn(&Captured) -> Vec<Result<Payload, PoolError>> + Send + Sync>;

pub enum Behaviour {
    /// Stream the given items, then end.
    Respond(Vec<Result<Payload, PoolError>>),
    /// Fail dispatch.
    Reject(PoolError),
    /// Head plus `chunks` body chunks; after a stop request at most two more.
    Stream { chunks: usize },
    /// Build the response from what the worker received.
    Inspect(Inspector),
}

/// Scripted worker pool.
pub struct MockPool {
    behaviour: Behaviour,
    pub captured: Mutex<Vec<Captured>>,
    pub stops_seen: Arc<AtomicUsize>,
    pub completed: Arc<AtomicBool>,
    pub resets: AtomicUsize,
    workers: Mutex<Vec<ProcessState>>,
}

impl MockPool {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            captured: Mutex::new(Vec::new()),
            stops_seen: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicBool::new(false)),
            resets: AtomicUsize::new(0),
            workers: Mutex::new(vec![worker(1, WorkerStatus::Ready)]),
        })
    }

    pub fn respond(items: Vec<Result<Payload, PoolError>>) -> Arc<Self> {
        Self::new(Behaviour::Respond(items))
    }

    pub fn inspect<F>(f: F) -> Arc<Self>
    where
        F: Fn(&Captured) -> Vec<Result<Payload, PoolError>> + Send + Sync + 'static,
    {
        Self::new(Behaviour::Inspect(Arc::new(f)))
    }

    pub fn set_workers(&self, workers: Vec<ProcessState>) {
        *self.workers.lock().unwrap() = workers;
    }

    pub fn captured(&self) -> Vec<Captured> {
        self.captured.lock().unwrap().clone()
    }

    fn spawn_items(items: Vec<Result<Payload, PoolError>>) -> ExecStream {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    fn spawn_stream(&self, chunks: usize, stop: StopSignal) -> ExecStream {
        let (tx, rx) = mpsc::channel(1);
        let stops_seen = self.stops_seen.clone();
        let completed = self.completed.clone();

        tokio::spawn(async move {
            let head = head(200, serde_json::json!({"Content-Type": ["text/plain"]}), "");
            if tx.send(Ok(head)).await.is_err() {
                return;
            }

            let mut remaining = chunks;
            let mut index = 0;
            while remaining > 0 {
                if tx.send(Ok(Payload::chunk(format!("chunk-{index}")))).await.is_err() {
                    return;
                }
                index += 1;
                remaining -= 1;
                if stop.try_recv() {
                    stops_seen.fetch_add(1, Ordering::SeqCst);
                    remaining = remaining.min(2);
                }
            }
            completed.store(true, Ordering::SeqCst);
        });
        rx
    }
}

impl WorkerPool for MockPool {
    fn exec<'a>(
        &'a self,
        payload: &'a Payload,
        stop: StopSignal,
    ) -> BoxFuture<'a, Result<ExecStream, PoolError>> {
        async move {
            let captured = Captured {
                context: serde_json::from_slice(&payload.context).unwrap_or(Value::Null),
                body: payload.body.to_vec(),
            };
            self.captured.lock().unwrap().push(captured.clone());

            match &self.behaviour {
                Behaviour::Reject(err) => Err(err.clone()),
                Behaviour::Respond(items) => Ok(Self::spawn_items(items.clone())),
                Behaviour::Inspect(inspect) => Ok(Self::spawn_items(inspect(&captured))),
                Behaviour::Stream { chunks } => Ok(self.spawn_stream(*chunks, stop)),
            }
        }
        .boxed()
    }

    fn workers(&self) -> Vec<ProcessState> {
        self.workers.lock().unwrap().clone()
    }

    fn add_worker(&self) -> BoxFuture<'_, Result<(), PoolError>> {
        let mut workers = self.workers.lock().unwrap();
        let pid = workers.len() as u32 + 1;
        workers.push(worker(pid, WorkerStatus::Ready));
        futures_util::future::ready(Ok(())).boxed()
    }

    fn remove_worker(&self) -> BoxFuture<'_, Result<(), PoolError>> {
        let removed = self.workers.lock().unwrap().pop();
        let result = match removed {
            Some(_) => Ok(()),
            None => Err(PoolError::NoFreeWorkers),
        };
        futures_util::future::ready(result).boxed()
    }

    fn reset(&self) -> BoxFuture<'_, Result<(), PoolError>> {
        async move {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}

pub fn worker(pid: u32, status: WorkerStatus) -> ProcessState {
    ProcessState {
        pid,
        status,
        num_execs: 0,
        created: 0,
        memory_usage: 0,
    }
}

/// Response head chunk.
pub fn head(status: i64, headers: Value, body: &str) -> Payload {
    let context = serde_json::json!({"status": status, "headers": headers});
    Payload::json(context.to_string(), body)
}

/// Fresh upload directory.
pub fn upload_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gateway-it-{}", Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

pub fn config(upload_dir: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.uploads.dir = upload_dir.to_path_buf();
    config
}

pub fn handler(pool: &Arc<MockPool>, config: &GatewayConfig) -> Handler {
    let pool: Arc<dyn WorkerPool> = pool.clone();
    Handler::new(config, Arc::new(SharedPool::new(pool)))
}

pub fn peer() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

pub fn request(method: &str, uri: &str, content_type: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri).header("host", "localhost");
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    builder.body(body.into()).unwrap()
}

pub enum Part<'a> {
    Field { name: &'a str, value: &'a str },
    File { name: &'a str, filename: &'a str, content: &'a str },
}

/// Multipart body and its content type.
pub fn multipart(parts: &[Part<'_>]) -> (String, String) {
    let mut body = String::new();
    for part in parts {
        body.push_str(&format!("--{BOUNDARY}\r\n"));
        match part {
            Part::Field { name, value } => {
                body.push_str(&format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"));
            }
            Part::File { name, filename, content } => {
                body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n{content}\r\n"
                ));
            }
        }
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}
