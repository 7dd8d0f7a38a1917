//! Traffic rate analyzer.
//!
//! # Responsibilities
//! - Track a bounded sliding window of request times per actor
//! - Block actors whose extrapolated requests-per-minute exceed the threshold
//! - Throttle automation user agents and repeated identical requests
//! - Exempt whitelisted actors entirely
//!
//! # Design Decisions
//! - One `DashMap` entry per actor; each update is one critical section
//! - The window never holds more timestamps than the threshold can need
//! - Blocks expire on their own; nothing renews them

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::TrafficConfig;
use crate::security::blocklist::BlockList;
use crate::security::clock::Clock;
use crate::security::request::RequestInfo;
use crate::security::types::{Assessment, DetectorError, EventCategory, SecurityEvent, Verdict};

#[derive(Debug)]
struct ActorWindow {
    hits: VecDeque<Instant>,
    last_signature: String,
    repeats: u32,
    last_seen: Instant,
}

impl ActorWindow {
    fn new(now: Instant) -> Self {
        Self {
            hits: VecDeque::new(),
            last_signature: String::new(),
            repeats: 0,
            last_seen: now,
        }
    }
}

/// Outcome of updating an actor's window.
enum WindowCheck {
    Exceeded { rpm: f64 },
    Repeated { repeats: u32 },
    Normal,
}

/// The traffic rate analyzer.
pub struct TrafficAnalyzer {
    windows: DashMap<String, ActorWindow>,
    /// Windows held; checked only when a new actor is inserted.
    tracked: AtomicUsize,
    blocks: BlockList,
    whitelist: ArcSwap<HashSet<String>>,
    requests_per_minute: f64,
    window: Duration,
    mitigation: Duration,
    repeat_limit: u32,
    automation_agents: Vec<String>,
    max_actors: usize,
    window_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl TrafficAnalyzer {
    pub const NAME: &'static str = "traffic_analyzer";

    pub fn new(config: &TrafficConfig, whitelist: &[String], clock: Arc<dyn Clock>) -> Self {
        let window_secs = config.window_secs.max(1);
        // Enough slots to observe one request past the threshold.
        let needed = (config.requests_per_minute as u64 * window_secs).div_ceil(60) as usize;

        Self {
            windows: DashMap::new(),
            tracked: AtomicUsize::new(0),
            blocks: BlockList::new(),
            whitelist: ArcSwap::from_pointee(whitelist.iter().cloned().collect()),
            requests_per_minute: config.requests_per_minute as f64,
            window: Duration::from_secs(window_secs),
            mitigation: Duration::from_secs(config.mitigation_secs),
            repeat_limit: config.repeat_signature_limit,
            automation_agents: config
                .automation_agents
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
            max_actors: config.max_tracked_actors,
            window_capacity: needed + 1,
            clock,
        }
    }

    /// Analyze a request.
    pub fn analyze(&self, request: &RequestInfo) -> Result<Assessment, DetectorError> {
        if self.is_whitelisted(&request.actor) {
            return Ok(Assessment::allow());
        }

        let now = self.clock.now();
        if let Some(remaining) = self.blocks.remaining(&request.actor, now) {
            let event = SecurityEvent::from_request(
                request,
                EventCategory::ActorBlocked,
                Self::NAME,
                6,
                self.clock.wall(),
            )
            .with_context("reason", "rate block active")
            .with_context("remaining_secs", remaining.as_secs());
            return Ok(Assessment::new(Verdict::Block, event).with_retry_after(remaining));
        }

        let signature = signature(request);
        let check = {
            let mut window = match self.windows.entry(request.actor.clone()) {
                Entry::Occupied(entry) => entry.into_ref(),
                Entry::Vacant(entry) => {
                    let tracked = self.tracked.load(Ordering::Relaxed);
                    if tracked >= self.max_actors {
                        return Err(DetectorError::CapacityExhausted {
                            detector: Self::NAME,
                            tracked,
                        });
                    }
                    self.tracked.fetch_add(1, Ordering::Relaxed);
                    entry.insert(ActorWindow::new(now))
                }
            };

            window.hits.push_back(now);
            while let Some(&oldest) = window.hits.front() {
                if now.saturating_duration_since(oldest) >= self.window {
                    window.hits.pop_front();
                } else {
                    break;
                }
            }
            while window.hits.len() > self.window_capacity {
                window.hits.pop_front();
            }
            window.last_seen = now;

            if window.last_signature == signature {
                window.repeats += 1;
            } else {
                window.last_signature = signature;
                window.repeats = 1;
            }

            let rpm = window.hits.len() as f64 * 60.0 / self.window.as_secs_f64();
            if rpm > self.requests_per_minute {
                WindowCheck::Exceeded { rpm }
            } else if window.repeats > self.repeat_limit {
                WindowCheck::Repeated {
                    repeats: window.repeats,
                }
            } else {
                WindowCheck::Normal
            }
        };

        match check {
            WindowCheck::Exceeded { rpm } => {
                self.blocks.block(&request.actor, now + self.mitigation);
                tracing::warn!(
                    actor = %request.actor,
                    rpm,
                    threshold = self.requests_per_minute,
                    block_secs = self.mitigation.as_secs(),
                    "Request rate exceeded, actor blocked"
                );
                let event = SecurityEvent::from_request(
                    request,
                    EventCategory::RateAbuse,
                    Self::NAME,
                    8,
                    self.clock.wall(),
                )
                .with_context("requests_per_minute", rpm)
                .with_context("threshold", self.requests_per_minute)
                .with_context("mitigation_secs", self.mitigation.as_secs());
                Ok(Assessment::new(Verdict::Block, event).with_retry_after(self.mitigation))
            }
            WindowCheck::Repeated { repeats } => {
                let event = SecurityEvent::from_request(
                    request,
                    EventCategory::RepeatedRequest,
                    Self::NAME,
                    5,
                    self.clock.wall(),
                )
                .with_context("repeats", repeats);
                Ok(Assessment::new(Verdict::RateLimit, event).with_retry_after(Duration::from_secs(1)))
            }
            WindowCheck::Normal => match self.automation_agent(request) {
                Some(agent) => {
                    let event = SecurityEvent::from_request(
                        request,
                        EventCategory::Automation,
                        Self::NAME,
                        5,
                        self.clock.wall(),
                    )
                    .with_context("agent_signature", agent);
                    Ok(Assessment::new(Verdict::RateLimit, event)
                        .with_retry_after(Duration::from_secs(1)))
                }
                None => Ok(Assessment::allow()),
            },
        }
    }

    pub fn is_whitelisted(&self, actor: &str) -> bool {
        self.whitelist.load().contains(actor)
    }

    /// Replace the whitelist.
    pub fn set_whitelist(&self, actors: &[String]) {
        self.whitelist
            .store(Arc::new(actors.iter().cloned().collect()));
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    pub fn tracked_actors(&self) -> usize {
        self.windows.len()
    }

    /// Drop expired blocks and windows idle for longer than the window.
    ///
    /// Runs from the maintenance sweep only; the request path never scans the map.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.windows.retain(|_, w| {
            let keep = now.saturating_duration_since(w.last_seen) < self.window;
            if !keep {
                removed += 1;
            }
            keep
        });
        self.tracked.fetch_sub(removed, Ordering::Relaxed);
        removed + self.blocks.prune(now)
    }

    fn automation_agent(&self, request: &RequestInfo) -> Option<&str> {
        let agent = request.user_agent()?.to_lowercase();
        self.automation_agents
            .iter()
            .find(|needle| agent.contains(needle.as_str()))
            .map(String::as_str)
    }
}

fn signature(request: &RequestInfo) -> String {
    match &request.query {
        Some(query) => format!("{} {}?{}", request.method, request.path, query),
        None => format!("{} {}", request.method, request.path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActorConfig;
    use crate::security::clock::ManualClock;
    use axum::http::{HeaderMap, HeaderValue, Method};

    fn request(actor: &str, path: &str, agent: &str) -> RequestInfo {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_str(actor).unwrap());
        headers.insert("user-agent", HeaderValue::from_str(agent).unwrap());
        RequestInfo::new(Method::GET, path, None, headers, None, &ActorConfig::default())
    }

    fn config() -> TrafficConfig {
        TrafficConfig {
            requests_per_minute: 100,
            window_secs: 60,
            mitigation_secs: 300,
            ..TrafficConfig::default()
        }
    }

    const BROWSER: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0)";

    #[test]
    fn test_rate_threshold_blocks_101st_request() {
        let clock = Arc::new(ManualClock::new());
        let analyzer = TrafficAnalyzer::new(&config(), &[], clock.clone());

        for i in 0..100 {
            let req = request("10.1.0.1", &format!("/page/{}", i), BROWSER);
            let assessment = analyzer.analyze(&req).unwrap();
            assert_eq!(assessment.verdict, Verdict::Allow, "request {}", i + 1);
            clock.advance(Duration::from_millis(500));
        }

        let assessment = analyzer.analyze(&request("10.1.0.1", "/page/100", BROWSER)).unwrap();
        assert_eq!(assessment.verdict, Verdict::Block);
        assert_eq!(assessment.retry_after, Some(Duration::from_secs(300)));
        let event = assessment.event.unwrap();
        assert_eq!(event.category, EventCategory::RateAbuse);
        assert_eq!(event.severity, crate::security::types::Severity::High);

        // Still blocked afterwards, with the remaining time reported.
        clock.advance(Duration::from_secs(10));
        let assessment = analyzer.analyze(&request("10.1.0.1", "/home", BROWSER)).unwrap();
        assert_eq!(assessment.verdict, Verdict::Block);
        assert_eq!(assessment.retry_after, Some(Duration::from_secs(290)));

        clock.advance(Duration::from_secs(290));
        assert!(!analyzer.blocks().is_blocked("10.1.0.1", clock.now()));
    }

    #[test]
    fn test_requests_outside_window_do_not_count() {
        let clock = Arc::new(ManualClock::new());
        let analyzer = TrafficAnalyzer::new(&config(), &[], clock.clone());

        for i in 0..300 {
            let req = request("10.1.0.2", &format!("/p/{}", i), BROWSER);
            assert_eq!(analyzer.analyze(&req).unwrap().verdict, Verdict::Allow);
            clock.advance(Duration::from_millis(700));
        }
    }

    #[test]
    fn test_whitelisted_actor_never_blocked() {
        let clock = Arc::new(ManualClock::new());
        let analyzer = TrafficAnalyzer::new(&config(), &["10.1.0.3".to_string()], clock.clone());

        for _ in 0..1000 {
            let req = request("10.1.0.3", "/same", "curl/8.0");
            assert_eq!(analyzer.analyze(&req).unwrap().verdict, Verdict::Allow);
            clock.advance(Duration::from_millis(50));
        }
        assert_eq!(analyzer.tracked_actors(), 0);
    }

    #[test]
    fn test_automation_agent_rate_limited() {
        let analyzer = TrafficAnalyzer::new(&config(), &[], Arc::new(ManualClock::new()));

        let assessment = analyzer.analyze(&request("10.1.0.4", "/", "python-requests/2.31")).unwrap();
        assert_eq!(assessment.verdict, Verdict::RateLimit);
        let event = assessment.event.unwrap();
        assert_eq!(event.category, EventCategory::Automation);
        assert_eq!(event.severity, crate::security::types::Severity::Medium);
        assert!(!analyzer.blocks().is_blocked("10.1.0.4", Instant::now()));
    }

    #[test]
    fn test_repeated_signature_rate_limited() {
        let clock = Arc::new(ManualClock::new());
        let cfg = TrafficConfig {
            repeat_signature_limit: 3,
            ..config()
        };
        let analyzer = TrafficAnalyzer::new(&cfg, &[], clock.clone());

        for _ in 0..3 {
            assert_eq!(
                analyzer.analyze(&request("10.1.0.5", "/login", BROWSER)).unwrap().verdict,
                Verdict::Allow
            );
            clock.advance(Duration::from_secs(1));
        }
        let assessment = analyzer.analyze(&request("10.1.0.5", "/login", BROWSER)).unwrap();
        assert_eq!(assessment.verdict, Verdict::RateLimit);
        assert_eq!(assessment.event.unwrap().category, EventCategory::RepeatedRequest);

        // A different request resets the run.
        assert_eq!(
            analyzer.analyze(&request("10.1.0.5", "/home", BROWSER)).unwrap().verdict,
            Verdict::Allow
        );
    }

    #[test]
    fn test_capacity_exhausted_is_an_error() {
        let cfg = TrafficConfig {
            max_tracked_actors: 2,
            ..config()
        };
        let analyzer = TrafficAnalyzer::new(&cfg, &[], Arc::new(ManualClock::new()));

        analyzer.analyze(&request("10.1.0.6", "/", BROWSER)).unwrap();
        analyzer.analyze(&request("10.1.0.7", "/", BROWSER)).unwrap();
        let err = analyzer.analyze(&request("10.1.0.8", "/", BROWSER)).unwrap_err();
        assert!(matches!(err, DetectorError::CapacityExhausted { tracked: 2, .. }));

        // Known actors are still served.
        assert!(analyzer.analyze(&request("10.1.0.6", "/a", BROWSER)).is_ok());
    }

    #[test]
    fn test_capacity_freed_by_sweep_not_by_requests() {
        let clock = Arc::new(ManualClock::new());
        let cfg = TrafficConfig {
            max_tracked_actors: 1,
            ..config()
        };
        let analyzer = TrafficAnalyzer::new(&cfg, &[], clock.clone());
        analyzer.analyze(&request("10.1.0.20", "/", BROWSER)).unwrap();

        // The only window is idle, but a new actor does not trigger eviction.
        clock.advance(Duration::from_secs(61));
        assert!(analyzer.analyze(&request("10.1.0.21", "/", BROWSER)).is_err());
        assert_eq!(analyzer.tracked_actors(), 1);

        assert_eq!(analyzer.prune(), 1);
        assert!(analyzer.analyze(&request("10.1.0.21", "/", BROWSER)).is_ok());
        assert_eq!(analyzer.tracked_actors(), 1);
    }

    #[test]
    fn test_prune_drops_idle_windows() {
        let clock = Arc::new(ManualClock::new());
        let analyzer = TrafficAnalyzer::new(&config(), &[], clock.clone());
        analyzer.analyze(&request("10.1.0.9", "/", BROWSER)).unwrap();

        clock.advance(Duration::from_secs(61));
        assert_eq!(analyzer.prune(), 1);
        assert_eq!(analyzer.tracked_actors(), 0);
    }

    #[test]
    fn test_set_whitelist() {
        let analyzer = TrafficAnalyzer::new(&config(), &[], Arc::new(ManualClock::new()));
        assert!(!analyzer.is_whitelisted("10.1.0.10"));
        analyzer.set_whitelist(&["10.1.0.10".to_string()]);
        assert!(analyzer.is_whitelisted("10.1.0.10"));
    }
}
