//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, HTTP/1.1 + HTTP/2, middleware stack)
//!     → attributes.rs (attribute bag on every request)
//!     → handler (request → worker pool → response chunks)
//!     → stream.rs (head via oneshot, body + trailers via channel)
//!     → access_log.rs (one line per completed request)
//!     → Send to client
//! ```

pub mod access_log;
pub mod attributes;
pub mod server;
pub mod stream;

pub use attributes::{Attributes, AttributesError};
pub use server::HttpServer;
pub use stream::StreamWriter;
