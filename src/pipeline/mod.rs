//! Security pipeline.
//!
//! # Responsibilities
//! - Run the detectors in a fixed order for every request
//! - Map verdicts onto allow or deny, including the Alert and RateLimit policy
//! - Record every non-Allow event to the correlator
//! - Fail open when a detector errors or panics
//!
//! # Data Flow
//! ```text
//! RequestInfo
//!     → RuleEngine          (Block → 403, stop)
//!     → TrafficAnalyzer     (Block → 429, stop)
//!     → BehaviorDetector    (Alert → 403 when policy says block, stop)
//!     → Decision::Allow
//! ```
//!
//! # Design Decisions
//! - The pipeline owns policy; detectors only report what they saw
//! - Detector state lives in the detectors, the pipeline holds only counters
//! - Public denial reasons are fixed strings

pub mod maintenance;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::http::StatusCode;
use serde::Serialize;

use crate::config::{AlertAction, GatewayConfig};
use crate::correlation::CorrelatorHandle;
use crate::observability::metrics;
use crate::security::rules::RuleError;
use crate::security::{
    Assessment, BehaviorDetector, BlockedActor, Clock, Detector, DetectorError, DetectorMode,
    RequestInfo, RuleEngine, TrafficAnalyzer, Verdict,
};

const REASON_BLOCKED: &str = "Request blocked by security policy";
const REASON_RATE: &str = "Too many requests";
const REASON_BEHAVIOR: &str = "Request pattern flagged as anomalous";

/// Why a request was rejected. Safe to show to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub status: StatusCode,
    pub reason: &'static str,
    pub retry_after: Option<Duration>,
    /// Detector that produced the verdict. Logged, never returned.
    pub detector: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(Denial),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Verdict policy that may change on reload.
#[derive(Debug, Clone, Copy)]
struct Policy {
    enforce_rate_limit: bool,
    alert_action: AlertAction,
}

impl Policy {
    fn from_config(config: &GatewayConfig) -> Self {
        Self {
            enforce_rate_limit: config.traffic.enforce_rate_limit,
            alert_action: config.behavior.alert_action,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    rate_limited: AtomicU64,
    detector_failures: AtomicU64,
    events_recorded: AtomicU64,
}

/// Snapshot of the pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub requests: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub rate_limited: u64,
    pub detector_failures: u64,
    pub events_recorded: u64,
    pub rules: usize,
    pub behavior_mode: DetectorMode,
}

/// Active blocks, per detector.
#[derive(Debug, Clone, Serialize)]
pub struct BlocksReport {
    pub rule_engine: Vec<BlockedActor>,
    pub traffic_analyzer: Vec<BlockedActor>,
}

/// Entries removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub rule_engine: usize,
    pub traffic_analyzer: usize,
    pub behavior_detector: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.rule_engine + self.traffic_analyzer + self.behavior_detector
    }
}

/// Orchestrates the detectors for each request.
pub struct SecurityPipeline {
    rules: RuleEngine,
    traffic: TrafficAnalyzer,
    behavior: BehaviorDetector,
    correlator: CorrelatorHandle,
    policy: ArcSwap<Policy>,
    counters: Counters,
    clock: Arc<dyn Clock>,
}

impl SecurityPipeline {
    pub fn new(
        config: &GatewayConfig,
        correlator: CorrelatorHandle,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RuleError> {
        let whitelist = &config.actors.whitelist;
        Ok(Self {
            rules: RuleEngine::new(&config.rules, clock.clone())?,
            traffic: TrafficAnalyzer::new(&config.traffic, whitelist, clock.clone()),
            behavior: BehaviorDetector::new(&config.behavior, whitelist, clock.clone()),
            correlator,
            policy: ArcSwap::from_pointee(Policy::from_config(config)),
            counters: Counters::default(),
            clock,
        })
    }

    /// Decide whether `request` may proceed.
    pub fn inspect(&self, request: &RequestInfo) -> Decision {
        let started = Instant::now();
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let policy = **self.policy.load();

        let decision = self.decide(request, policy);

        let outcome = match &decision {
            Decision::Allow => {
                self.counters.allowed.fetch_add(1, Ordering::Relaxed);
                "allowed"
            }
            Decision::Deny(denial) if denial.status == StatusCode::TOO_MANY_REQUESTS => {
                self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                "rate_limited"
            }
            Decision::Deny(_) => {
                self.counters.blocked.fetch_add(1, Ordering::Relaxed);
                "blocked"
            }
        };
        metrics::record_request(outcome, started.elapsed());
        decision
    }

    fn decide(&self, request: &RequestInfo, policy: Policy) -> Decision {
        let rule = self.run(&self.rules, request);
        match rule.verdict {
            Verdict::Block => return deny(StatusCode::FORBIDDEN, REASON_BLOCKED, &rule, RuleEngine::NAME),
            Verdict::RateLimit if policy.enforce_rate_limit => {
                return deny(StatusCode::TOO_MANY_REQUESTS, REASON_RATE, &rule, RuleEngine::NAME)
            }
            _ => {}
        }

        let traffic = self.run(&self.traffic, request);
        match traffic.verdict {
            Verdict::Block => {
                return deny(StatusCode::TOO_MANY_REQUESTS, REASON_RATE, &traffic, TrafficAnalyzer::NAME)
            }
            Verdict::RateLimit if policy.enforce_rate_limit => {
                return deny(StatusCode::TOO_MANY_REQUESTS, REASON_RATE, &traffic, TrafficAnalyzer::NAME)
            }
            _ => {}
        }

        let behavior = self.run(&self.behavior, request);
        if behavior.verdict == Verdict::Alert && policy.alert_action == AlertAction::Block {
            return deny(StatusCode::FORBIDDEN, REASON_BEHAVIOR, &behavior, BehaviorDetector::NAME);
        }

        Decision::Allow
    }

    /// Run one detector, record its event, and fail open on error.
    fn run(&self, detector: &dyn Detector, request: &RequestInfo) -> Assessment {
        let assessment = match run_guarded(detector, request) {
            Ok(assessment) => assessment,
            Err(e) => {
                self.counters.detector_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_detector_failure(detector.name());
                tracing::error!(
                    detector = detector.name(),
                    actor = %request.actor,
                    error = %e,
                    "Detector failed, allowing request"
                );
                return Assessment::allow();
            }
        };

        if !assessment.is_allow() {
            metrics::record_verdict(detector.name(), assessment.verdict.as_str());
            if let Some(event) = &assessment.event {
                self.counters.events_recorded.fetch_add(1, Ordering::Relaxed);
                self.correlator.record(event.clone());
            }
        }
        assessment
    }

    /// Apply a reloaded configuration. Actor state is kept.
    ///
    /// On error nothing changes.
    pub fn apply_config(&self, config: &GatewayConfig) -> Result<(), RuleError> {
        self.rules.reload(&config.rules)?;
        self.traffic.set_whitelist(&config.actors.whitelist);
        self.behavior.set_whitelist(&config.actors.whitelist);
        self.policy.store(Arc::new(Policy::from_config(config)));
        tracing::info!(
            whitelist = config.actors.whitelist.len(),
            "Security pipeline configuration applied"
        );
        Ok(())
    }

    /// Evict expired blocks, idle counters and stale profiles.
    pub fn prune(&self) -> PruneReport {
        PruneReport {
            rule_engine: self.rules.prune(),
            traffic_analyzer: self.traffic.prune(),
            behavior_detector: self.behavior.prune(),
        }
    }

    pub fn active_blocks(&self) -> BlocksReport {
        let now = self.clock.now();
        BlocksReport {
            rule_engine: self.rules.blocks().active(now),
            traffic_analyzer: self.traffic.blocks().active(now),
        }
    }

    /// Lift every block on `actor`. Returns whether any was present.
    pub fn unblock(&self, actor: &str) -> bool {
        let rule = self.rules.unblock(actor);
        let traffic = self.traffic.blocks().unblock(actor);
        if rule || traffic {
            tracing::info!(actor = %actor, "Actor unblocked");
        }
        rule || traffic
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            allowed: self.counters.allowed.load(Ordering::Relaxed),
            blocked: self.counters.blocked.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            detector_failures: self.counters.detector_failures.load(Ordering::Relaxed),
            events_recorded: self.counters.events_recorded.load(Ordering::Relaxed),
            rules: self.rules.rule_count(),
            behavior_mode: self.behavior.mode(),
        }
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn traffic_analyzer(&self) -> &TrafficAnalyzer {
        &self.traffic
    }

    pub fn behavior_detector(&self) -> &BehaviorDetector {
        &self.behavior
    }
}

fn deny(status: StatusCode, reason: &'static str, assessment: &Assessment, detector: &'static str) -> Decision {
    Decision::Deny(Denial {
        status,
        reason,
        retry_after: assessment.retry_after,
        detector,
    })
}

/// Call a detector, turning a panic into [`DetectorError::Panicked`].
fn run_guarded(detector: &dyn Detector, request: &RequestInfo) -> Result<Assessment, DetectorError> {
    match catch_unwind(AssertUnwindSafe(|| detector.inspect(request))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(DetectorError::Panicked {
                detector: detector.name(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActorConfig, CustomRuleConfig};
    use crate::security::rules::RuleAction;
    use crate::security::{EventCategory, ManualClock, SecurityEvent};
    use axum::http::{HeaderMap, HeaderValue, Method};
    use tokio::sync::mpsc;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";

    fn request(actor: &str, path: &str, query: Option<&str>, agent: &str) -> RequestInfo {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(actor).unwrap());
        headers.insert("user-agent", HeaderValue::from_str(agent).unwrap());
        RequestInfo::new(
            Method::GET,
            path,
            query.map(str::to_string),
            headers,
            None,
            &ActorConfig::default(),
        )
    }

    fn pipeline(config: &GatewayConfig) -> (SecurityPipeline, mpsc::Receiver<SecurityEvent>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let (handle, rx) = CorrelatorHandle::detached(1024);
        let pipeline = SecurityPipeline::new(config, handle, clock.clone()).unwrap();
        (pipeline, rx, clock)
    }

    fn drain(rx: &mut mpsc::Receiver<SecurityEvent>) -> Vec<SecurityEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_benign_request_allowed_without_events() {
        let (pipeline, mut rx, _) = pipeline(&GatewayConfig::default());
        let decision = pipeline.inspect(&request("10.5.0.1", "/patients", Some("page=2"), BROWSER));

        assert_eq!(decision, Decision::Allow);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(pipeline.stats().allowed, 1);
    }

    #[test]
    fn test_sql_injection_denied_with_generic_reason() {
        let (pipeline, mut rx, _) = pipeline(&GatewayConfig::default());
        let decision = pipeline.inspect(&request(
            "10.5.0.2",
            "/search",
            Some("q=1%27%20UNION%20SELECT%20password%20FROM%20users"),
            BROWSER,
        ));

        let Decision::Deny(denial) = decision else {
            panic!("expected a denial");
        };
        assert_eq!(denial.status, StatusCode::FORBIDDEN);
        assert_eq!(denial.detector, RuleEngine::NAME);
        assert!(!denial.reason.contains("sqli"));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, EventCategory::SqlInjection);
        assert_eq!(pipeline.stats().blocked, 1);
    }

    #[test]
    fn test_rate_block_is_429_with_retry_after() {
        let mut config = GatewayConfig::default();
        config.traffic.requests_per_minute = 5;
        let (pipeline, _rx, _) = pipeline(&config);

        for i in 0..5 {
            let req = request("10.5.0.3", &format!("/p/{}", i), None, BROWSER);
            assert!(pipeline.inspect(&req).is_allow());
        }
        let Decision::Deny(denial) = pipeline.inspect(&request("10.5.0.3", "/p/5", None, BROWSER)) else {
            panic!("expected a denial");
        };
        assert_eq!(denial.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denial.retry_after, Some(Duration::from_secs(300)));
        assert_eq!(pipeline.active_blocks().traffic_analyzer.len(), 1);
    }

    #[test]
    fn test_rate_limit_policy() {
        let (enforcing, _rx, _) = pipeline(&GatewayConfig::default());
        let Decision::Deny(denial) = enforcing.inspect(&request("10.5.0.4", "/", None, "curl/8.4.0")) else {
            panic!("expected a denial");
        };
        assert_eq!(denial.status, StatusCode::TOO_MANY_REQUESTS);

        let mut config = GatewayConfig::default();
        config.traffic.enforce_rate_limit = false;
        let (lenient, mut rx, _) = pipeline(&config);
        assert!(lenient.inspect(&request("10.5.0.4", "/", None, "curl/8.4.0")).is_allow());
        assert_eq!(drain(&mut rx)[0].category, EventCategory::Automation);
    }

    #[test]
    fn test_alert_policy_block() {
        let mut config = GatewayConfig::default();
        config.behavior.learning_secs = 0;
        config.behavior.alert_action = AlertAction::Block;
        let (pipeline, _rx, clock) = pipeline(&config);
        let agents = [BROWSER, "Mozilla/5.0 (Windows NT 10.0) Edge/126.0"];

        let mut decisions = Vec::new();
        for i in 0..10 {
            let req = request("10.5.0.5", &format!("/record/{}", i), None, agents[i % 2]);
            decisions.push(pipeline.inspect(&req));
            clock.advance(Duration::from_millis(100));
        }
        assert!(decisions[..9].iter().all(Decision::is_allow));
        let Decision::Deny(denial) = &decisions[9] else {
            panic!("expected a denial");
        };
        assert_eq!(denial.status, StatusCode::FORBIDDEN);
        assert_eq!(denial.detector, BehaviorDetector::NAME);
    }

    #[test]
    fn test_alert_policy_log_allows_and_records() {
        let mut config = GatewayConfig::default();
        config.behavior.learning_secs = 0;
        let (pipeline, mut rx, clock) = pipeline(&config);
        let agents = [BROWSER, "Mozilla/5.0 (Windows NT 10.0) Edge/126.0"];

        for i in 0..10 {
            let req = request("10.5.0.6", &format!("/record/{}", i), None, agents[i % 2]);
            assert!(pipeline.inspect(&req).is_allow());
            clock.advance(Duration::from_millis(100));
        }
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, EventCategory::BehavioralAnomaly);
    }

    #[test]
    fn test_detector_failure_fails_open() {
        let mut config = GatewayConfig::default();
        config.traffic.max_tracked_actors = 1;
        let (pipeline, _rx, _) = pipeline(&config);

        assert!(pipeline.inspect(&request("10.5.0.7", "/", None, BROWSER)).is_allow());
        assert!(pipeline.inspect(&request("10.5.0.8", "/", None, BROWSER)).is_allow());
        assert_eq!(pipeline.stats().detector_failures, 1);
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn inspect(&self, _request: &RequestInfo) -> Result<Assessment, DetectorError> {
            panic!("profile table corrupted");
        }
    }

    #[test]
    fn test_panic_becomes_error() {
        let err = run_guarded(&PanickingDetector, &request("10.5.0.9", "/", None, BROWSER)).unwrap_err();
        match err {
            DetectorError::Panicked { detector, message } => {
                assert_eq!(detector, "panicking");
                assert_eq!(message, "profile table corrupted");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_whitelisted_get_is_idempotent() {
        let mut config = GatewayConfig::default();
        config.actors.whitelist = vec!["10.5.0.10".to_string()];
        let (pipeline, mut rx, _) = pipeline(&config);
        let req = request("10.5.0.10", "/dashboard", Some("tab=vitals"), BROWSER);

        assert!(pipeline.inspect(&req).is_allow());
        let blocks_before = pipeline.active_blocks();
        assert!(pipeline.inspect(&req).is_allow());

        assert!(drain(&mut rx).is_empty());
        assert!(blocks_before.rule_engine.is_empty());
        assert!(pipeline.active_blocks().traffic_analyzer.is_empty());
        assert_eq!(pipeline.traffic_analyzer().tracked_actors(), 0);
        assert_eq!(pipeline.behavior_detector().profile_count(), 0);
        assert_eq!(pipeline.rule_engine().violations("10.5.0.10"), 0);
        assert_eq!(pipeline.stats().requests, 2);
    }

    #[test]
    fn test_apply_config_swaps_rules_and_keeps_blocks() {
        let mut config = GatewayConfig::default();
        config.rules.block_threshold = 1;
        let (pipeline, _rx, _) = pipeline(&config);

        let attack = request("10.5.0.11", "/", Some("file=../../etc/passwd"), BROWSER);
        assert!(!pipeline.inspect(&attack).is_allow());

        config.rules.custom.push(CustomRuleConfig {
            id: "legacy-endpoint".to_string(),
            pattern: r"^GET /legacy/".to_string(),
            action: RuleAction::Block,
            score: 6,
            enabled: true,
        });
        pipeline.apply_config(&config).unwrap();

        assert!(!pipeline.inspect(&request("10.5.0.12", "/legacy/export", None, BROWSER)).is_allow());
        assert_eq!(pipeline.active_blocks().rule_engine.len(), 2);

        let rules_before = pipeline.rule_engine().rule_count();
        config.rules.custom[0].pattern = "(unclosed".to_string();
        assert!(pipeline.apply_config(&config).is_err());
        assert_eq!(pipeline.rule_engine().rule_count(), rules_before);
    }

    #[test]
    fn test_unblock_restores_access() {
        let mut config = GatewayConfig::default();
        config.rules.block_threshold = 1;
        let (pipeline, _rx, _) = pipeline(&config);

        pipeline.inspect(&request("10.5.0.13", "/", Some("q=<script>alert(1)</script>"), BROWSER));
        assert!(!pipeline.inspect(&request("10.5.0.13", "/home", None, BROWSER)).is_allow());

        assert!(pipeline.unblock("10.5.0.13"));
        assert!(!pipeline.unblock("10.5.0.13"));
        assert!(pipeline.inspect(&request("10.5.0.13", "/home", None, BROWSER)).is_allow());
    }

    #[test]
    fn test_prune_after_expiry() {
        let mut config = GatewayConfig::default();
        config.rules.block_threshold = 1;
        config.rules.block_duration_secs = 60;
        config.rules.violation_retention_secs = 60;
        let (pipeline, _rx, clock) = pipeline(&config);

        pipeline.inspect(&request("10.5.0.14", "/", Some("q=<script>"), BROWSER));
        clock.advance(Duration::from_secs(3_601));

        let report = pipeline.prune();
        assert_eq!(report.rule_engine, 2);
        assert_eq!(report.traffic_analyzer, 0);
        assert!(pipeline.active_blocks().rule_engine.is_empty());
    }
}
