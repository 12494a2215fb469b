//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Handler, transport, admin API produce:
//!     → logging.rs (structured log events, request stage as a field)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID (x-request-id) is set and propagated by the router layers
//! - Metrics are cheap when no exporter is installed

pub mod logging;
pub mod metrics;
