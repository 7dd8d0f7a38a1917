//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Export to the sink:
//!     → HttpSink enforces the per-request timeout
//!     → On failure: backoff.rs (delay before the next attempt)
//!     → After the last attempt: batch kept in the bounded retry buffer
//! ```
//!
//! # Design Decisions
//! - Every external call has a deadline
//! - Retries are bounded; the request path never waits on them

pub mod backoff;

pub use backoff::calculate_backoff;
