//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, layers)
//!     → request.rs (request ID)
//!     → middleware/security.rs (RequestInfo, pipeline decision)
//!         → denied: response.rs (JSON denial, Retry-After)
//!         → allowed: server.rs forward_handler → upstream
//!     → security headers on the response
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{DenialBody, DENIAL_ERROR};
pub use server::HttpServer;
