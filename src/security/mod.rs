//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → trusted.rs (peer in trusted subnets? read forwarding headers)
//!     → remote address handed to the worker
//! ```
//!
//! # Design Decisions
//! - Forwarding headers from untrusted peers are ignored
//! - The socket address is the fallback, never an empty string

pub mod trusted;

pub use trusted::TrustedResolver;
