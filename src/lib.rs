//! Request security gateway library.
//!
//! Firewall rules, traffic rate analysis and behavioral anomaly detection in
//! front of an upstream application, with event correlation and export.

pub mod admin;
pub mod config;
pub mod correlation;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod security;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Decision, SecurityPipeline};
