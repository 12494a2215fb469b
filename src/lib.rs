//! HTTP gateway in front of a worker process pool.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    WORKER GATEWAY                     │
//!                     │                                                       │
//!  Client Request     │  ┌────────┐   ┌───────────┐   ┌──────────────────┐    │
//!  ───────────────────┼─▶│  http  │──▶│  handler  │──▶│ pool (injected)  │────┼──▶ Workers
//!                     │  │ server │   │ parse/enc │   │  exec → stream   │    │
//!                     │  └────────┘   └───────────┘   └────────┬─────────┘    │
//!                     │                                        │              │
//!  Client Response    │  ┌────────┐   ┌───────────┐            │              │
//!  ◀──────────────────┼──│ stream │◀──│ response  │◀───────────┘              │
//!                     │  │ writer │   │  chunks   │                           │
//!                     │  └────────┘   └───────────┘                           │
//!                     │                                                       │
//!                     │  config · security · observability · admin · lifecycle│
//!                     └──────────────────────────────────────────────────────┘
//! ```

pub mod admin;
pub mod config;
pub mod handler;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod security;

pub use config::GatewayConfig;
pub use handler::{Handler, HandlerError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pool::{Payload, PoolError, SharedPool, StopSignal, WorkerPool};
