//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (bounded body probe for mutating methods)
//!     → request.rs (RequestInfo, actor key)
//!     → rules/ (signature rules, violation counting)
//!     → rate_limit.rs (sliding window per actor)
//!     → behavior.rs (session profile scoring)
//!     → headers.rs (security headers on the way out)
//! ```
//!
//! # Design Decisions
//! - Detectors are independent; the pipeline decides what their verdicts mean
//! - Detector failures are errors, never verdicts
//! - All time comes from an injected [`Clock`]

pub mod behavior;
pub mod blocklist;
pub mod clock;
pub mod headers;
pub mod limits;
pub mod rate_limit;
pub mod request;
pub mod rules;
pub mod types;

pub use behavior::{BehaviorDetector, DetectorMode};
pub use blocklist::{BlockList, BlockedActor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use rate_limit::TrafficAnalyzer;
pub use request::RequestInfo;
pub use rules::{RuleEngine, RuleSet};
pub use types::{Assessment, DetectorError, EventCategory, SecurityEvent, Severity, Verdict};

/// A per-request security check.
pub trait Detector: Send + Sync {
    /// Stable name used in logs and metrics.
    fn name(&self) -> &'static str;

    fn inspect(&self, request: &RequestInfo) -> Result<Assessment, DetectorError>;
}

impl Detector for RuleEngine {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn inspect(&self, request: &RequestInfo) -> Result<Assessment, DetectorError> {
        self.evaluate(request)
    }
}

impl Detector for TrafficAnalyzer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn inspect(&self, request: &RequestInfo) -> Result<Assessment, DetectorError> {
        self.analyze(request)
    }
}

impl Detector for BehaviorDetector {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn inspect(&self, request: &RequestInfo) -> Result<Assessment, DetectorError> {
        self.analyze(request)
    }
}
