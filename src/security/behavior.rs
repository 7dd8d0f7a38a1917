//! Behavioral anomaly detector.
//!
//! Keeps a rolling profile per subject (user id when authenticated, actor key
//! otherwise) and scores how machine-like its recent behavior looks.
//!
//! # Modes
//! - **Learning**: for `learning_secs` after construction. Profiles and
//!   baselines are updated, the verdict is always Allow.
//! - **Detecting**: entered once, never left. Profiles keep updating and are
//!   scored; baselines are frozen.
//!
//! # Score
//! The mean of the factors that apply to the profile:
//! - rate deviation from the learned baseline, capped at 1.0 (only with a baseline)
//! - distinct-path ratio, counted when above the diversity threshold
//! - a penalty when more than one user agent was seen
//! - a penalty when recent intervals are too regular to be human
//!
//! Factors that apply but did not trigger count as 0.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::config::BehaviorConfig;
use crate::security::clock::Clock;
use crate::security::request::RequestInfo;
use crate::security::types::{Assessment, DetectorError, EventCategory, SecurityEvent, Verdict};

const MAX_DISTINCT_PATHS: usize = 1024;
const MAX_DISTINCT_AGENTS: usize = 16;

/// Detector lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
    Learning,
    Detecting,
}

/// Rolling statistics for one subject.
#[derive(Debug)]
struct SessionProfile {
    count: u64,
    paths: HashSet<String>,
    agents: HashSet<String>,
    intervals: VecDeque<f64>,
    last: Instant,
    baseline_rpm: Option<f64>,
}

impl SessionProfile {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            paths: HashSet::new(),
            agents: HashSet::new(),
            intervals: VecDeque::new(),
            last: now,
            baseline_rpm: None,
        }
    }

    fn observe(&mut self, request: &RequestInfo, now: Instant, history: usize) {
        if self.count > 0 {
            if self.intervals.len() == history {
                self.intervals.pop_front();
            }
            self.intervals
                .push_back(now.saturating_duration_since(self.last).as_secs_f64());
        }
        self.count += 1;
        self.last = now;

        if self.paths.len() < MAX_DISTINCT_PATHS {
            self.paths.insert(request.path.clone());
        }
        let agent = request.user_agent().unwrap_or("");
        if self.agents.len() < MAX_DISTINCT_AGENTS {
            self.agents.insert(agent.to_string());
        }
    }

    /// Requests per minute implied by the recent intervals.
    fn current_rpm(&self) -> Option<f64> {
        if self.intervals.is_empty() {
            return None;
        }
        let mean = self.intervals.iter().sum::<f64>() / self.intervals.len() as f64;
        // Sub-millisecond bursts all read as the same very high rate.
        Some(60.0 / mean.max(0.001))
    }

    fn interval_variance(&self) -> Option<f64> {
        if self.intervals.len() < 3 {
            return None;
        }
        let n = self.intervals.len() as f64;
        let mean = self.intervals.iter().sum::<f64>() / n;
        Some(self.intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n)
    }
}

#[derive(Debug, Clone, Copy)]
struct Scoring {
    threshold: f64,
    high_diversity: f64,
    multi_agent_penalty: f64,
    regular_interval_penalty: f64,
    variance_threshold: f64,
    min_requests: u64,
}

/// Factor breakdown for one profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnomalyScore {
    pub rate_deviation: Option<f64>,
    pub path_diversity: f64,
    pub multi_agent: f64,
    pub regularity: Option<f64>,
    pub score: f64,
}

impl Scoring {
    fn score(&self, profile: &SessionProfile) -> AnomalyScore {
        let mut factors = Vec::with_capacity(4);

        let rate_deviation = match (profile.baseline_rpm, profile.current_rpm()) {
            (Some(baseline), Some(current)) if baseline > 0.0 => {
                Some(((current - baseline).abs() / baseline).min(1.0))
            }
            _ => None,
        };
        factors.extend(rate_deviation);

        let ratio = profile.paths.len() as f64 / profile.count.max(1) as f64;
        let path_diversity = if ratio > self.high_diversity { ratio.min(1.0) } else { 0.0 };
        factors.push(path_diversity);

        let multi_agent = if profile.agents.len() > 1 {
            self.multi_agent_penalty
        } else {
            0.0
        };
        factors.push(multi_agent);

        let regularity = profile.interval_variance().map(|variance| {
            if variance < self.variance_threshold {
                self.regular_interval_penalty
            } else {
                0.0
            }
        });
        factors.extend(regularity);

        let score = factors.iter().sum::<f64>() / factors.len() as f64;
        AnomalyScore {
            rate_deviation,
            path_diversity,
            multi_agent,
            regularity,
            score,
        }
    }
}

/// The behavioral anomaly detector.
pub struct BehaviorDetector {
    profiles: DashMap<String, SessionProfile>,
    tracked: AtomicUsize,
    whitelist: ArcSwap<HashSet<String>>,
    started: Instant,
    learning: Duration,
    detecting: AtomicBool,
    scoring: Scoring,
    interval_history: usize,
    profile_ttl: Duration,
    max_profiles: usize,
    clock: Arc<dyn Clock>,
}

impl BehaviorDetector {
    pub const NAME: &'static str = "behavior_detector";

    pub fn new(config: &BehaviorConfig, whitelist: &[String], clock: Arc<dyn Clock>) -> Self {
        let learning = Duration::from_secs(config.learning_secs);
        Self {
            profiles: DashMap::new(),
            tracked: AtomicUsize::new(0),
            whitelist: ArcSwap::from_pointee(whitelist.iter().cloned().collect()),
            started: clock.now(),
            learning,
            detecting: AtomicBool::new(learning.is_zero()),
            scoring: Scoring {
                threshold: config.anomaly_threshold,
                high_diversity: config.high_diversity_threshold,
                multi_agent_penalty: config.multi_agent_penalty,
                regular_interval_penalty: config.regular_interval_penalty,
                variance_threshold: config.interval_variance_threshold,
                min_requests: config.min_requests,
            },
            interval_history: config.interval_history.max(2),
            profile_ttl: Duration::from_secs(config.profile_ttl_secs),
            max_profiles: config.max_profiles,
            clock,
        }
    }

    /// Current mode. The switch to Detecting happens on the first call after
    /// the learning period has elapsed.
    pub fn mode(&self) -> DetectorMode {
        if self.detecting.load(Ordering::Acquire) {
            return DetectorMode::Detecting;
        }
        let elapsed = self.clock.now().saturating_duration_since(self.started);
        if elapsed < self.learning {
            return DetectorMode::Learning;
        }
        if !self.detecting.swap(true, Ordering::AcqRel) {
            tracing::info!(
                learning_secs = self.learning.as_secs(),
                profiles = self.profiles.len(),
                "Behavioral learning phase complete, detection enabled"
            );
        }
        DetectorMode::Detecting
    }

    /// Analyze a request for its subject.
    pub fn analyze(&self, request: &RequestInfo) -> Result<Assessment, DetectorError> {
        let subject = request.subject();
        if self.is_whitelisted(&request.actor) || self.is_whitelisted(subject) {
            return Ok(Assessment::allow());
        }

        let mode = self.mode();
        let now = self.clock.now();

        let score = {
            let mut profile = match self.profiles.entry(subject.to_string()) {
                Entry::Occupied(entry) => entry.into_ref(),
                Entry::Vacant(entry) => {
                    let tracked = self.tracked.load(Ordering::Relaxed);
                    if tracked >= self.max_profiles {
                        return Err(DetectorError::CapacityExhausted {
                            detector: Self::NAME,
                            tracked,
                        });
                    }
                    self.tracked.fetch_add(1, Ordering::Relaxed);
                    entry.insert(SessionProfile::new(now))
                }
            };

            // A profile idle past its TTL starts over.
            if profile.count > 0 && now.saturating_duration_since(profile.last) >= self.profile_ttl {
                *profile = SessionProfile::new(now);
            }
            profile.observe(request, now, self.interval_history);

            match mode {
                DetectorMode::Learning => {
                    if let Some(rpm) = profile.current_rpm() {
                        profile.baseline_rpm = Some(rpm);
                    }
                    None
                }
                DetectorMode::Detecting if profile.count >= self.scoring.min_requests => {
                    Some(self.scoring.score(&profile))
                }
                DetectorMode::Detecting => None,
            }
        };

        let Some(score) = score else {
            return Ok(Assessment::allow());
        };
        if score.score <= self.scoring.threshold {
            return Ok(Assessment::allow());
        }

        tracing::warn!(
            subject = %subject,
            score = score.score,
            threshold = self.scoring.threshold,
            "Behavioral anomaly detected"
        );

        let mut event = SecurityEvent::from_request(
            request,
            EventCategory::BehavioralAnomaly,
            Self::NAME,
            8,
            self.clock.wall(),
        )
        .with_context("subject", subject)
        .with_context("anomaly_score", score.score)
        .with_context("path_diversity", score.path_diversity)
        .with_context("multi_agent", score.multi_agent);
        if let Some(deviation) = score.rate_deviation {
            event = event.with_context("rate_deviation", deviation);
        }
        if let Some(regularity) = score.regularity {
            event = event.with_context("regularity", regularity);
        }

        Ok(Assessment::new(Verdict::Alert, event))
    }

    /// Score a subject's current profile without updating it.
    pub fn score(&self, subject: &str) -> Option<AnomalyScore> {
        let profile = self.profiles.get(subject)?;
        Some(self.scoring.score(&profile))
    }

    pub fn is_whitelisted(&self, key: &str) -> bool {
        self.whitelist.load().contains(key)
    }

    pub fn set_whitelist(&self, actors: &[String]) {
        self.whitelist
            .store(Arc::new(actors.iter().cloned().collect()));
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    /// Evict profiles idle past their TTL. Called by the maintenance sweep.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.profiles.retain(|_, p| {
            let keep = now.saturating_duration_since(p.last) < self.profile_ttl;
            if !keep {
                removed += 1;
            }
            keep
        });
        self.tracked.fetch_sub(removed, Ordering::Relaxed);
        removed
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

    fn config() -> BehaviorConfig {
        BehaviorConfig {
            learning_secs: 3600,
            ..BehaviorConfig::default()
        }
    }

    const AGENTS: [&str; 2] = ["Mozilla/5.0 (X11; Linux x86_64)", "Mozilla/5.0 (Windows NT 10.0)"];

    #[test]
    fn test_learning_mode_always_allows() {
        let clock = Arc::new(ManualClock::new());
        let detector = BehaviorDetector::new(&config(), &[], clock.clone());
        assert_eq!(detector.mode(), DetectorMode::Learning);

        for i in 0..50 {
            let req = request("10.2.0.1", &format!("/scan/{}", i), AGENTS[i % 2]);
            assert_eq!(detector.analyze(&req).unwrap().verdict, Verdict::Allow);
            clock.advance(Duration::from_millis(100));
        }
        assert_eq!(detector.mode(), DetectorMode::Learning);
        assert_eq!(detector.profile_count(), 1);
    }

    #[test]
    fn test_scripted_session_alerts_after_learning() {
        let clock = Arc::new(ManualClock::new());
        let detector = BehaviorDetector::new(&config(), &[], clock.clone());

        clock.advance(Duration::from_secs(3601));
        assert_eq!(detector.mode(), DetectorMode::Detecting);

        let mut last = Assessment::allow();
        for i in 0..50 {
            let req = request("10.2.0.2", &format!("/item/{}", i), AGENTS[i % 2]);
            last = detector.analyze(&req).unwrap();
            clock.advance(Duration::from_millis(100));
        }

        let score = detector.score("10.2.0.2").unwrap();
        assert!(score.score > 0.7, "score {}", score.score);
        assert!((score.score - 0.9).abs() < 1e-9);

        assert_eq!(last.verdict, Verdict::Alert);
        let event = last.event.unwrap();
        assert_eq!(event.category, EventCategory::BehavioralAnomaly);
        assert_eq!(event.severity, crate::security::types::Severity::High);
        assert!(event.context.contains_key("anomaly_score"));
    }

    #[test]
    fn test_human_session_allowed() {
        let clock = Arc::new(ManualClock::new());
        let detector = BehaviorDetector::new(&config(), &[], clock.clone());
        clock.advance(Duration::from_secs(3601));

        let pauses = [2_300, 800, 5_100, 1_200, 9_700, 3_400, 650, 4_000];
        for i in 0..40 {
            let req = request("10.2.0.3", &format!("/page/{}", i % 4), AGENTS[0]);
            assert_eq!(detector.analyze(&req).unwrap().verdict, Verdict::Allow);
            clock.advance(Duration::from_millis(pauses[i % pauses.len()]));
        }
    }

    #[test]
    fn test_baseline_learned_then_deviation_scored() {
        let clock = Arc::new(ManualClock::new());
        let cfg = BehaviorConfig {
            learning_secs: 60,
            ..config()
        };
        let detector = BehaviorDetector::new(&cfg, &[], clock.clone());

        // One request every 10 s during learning: 6 rpm baseline.
        for _ in 0..5 {
            detector.analyze(&request("10.2.0.4", "/home", AGENTS[0])).unwrap();
            clock.advance(Duration::from_secs(10));
        }
        clock.advance(Duration::from_secs(20));
        assert_eq!(detector.mode(), DetectorMode::Detecting);

        for _ in 0..30 {
            detector.analyze(&request("10.2.0.4", "/home", AGENTS[0])).unwrap();
            clock.advance(Duration::from_millis(500));
        }
        let score = detector.score("10.2.0.4").unwrap();
        assert_eq!(score.rate_deviation, Some(1.0));
    }

    #[test]
    fn test_scoring_waits_for_min_requests() {
        let clock = Arc::new(ManualClock::new());
        let cfg = BehaviorConfig {
            learning_secs: 0,
            ..config()
        };
        let detector = BehaviorDetector::new(&cfg, &[], clock.clone());

        for i in 0..9 {
            let req = request("10.2.0.5", &format!("/x/{}", i), AGENTS[i % 2]);
            assert_eq!(detector.analyze(&req).unwrap().verdict, Verdict::Allow);
            clock.advance(Duration::from_millis(100));
        }
        let req = request("10.2.0.5", "/x/9", AGENTS[1]);
        assert_eq!(detector.analyze(&req).unwrap().verdict, Verdict::Alert);
    }

    #[test]
    fn test_user_id_is_the_subject() {
        let cfg = BehaviorConfig {
            learning_secs: 0,
            ..config()
        };
        let detector = BehaviorDetector::new(&cfg, &[], Arc::new(ManualClock::new()));

        let mut req = request("10.2.0.6", "/", AGENTS[0]);
        req.user_id = Some("clinician-17".to_string());
        detector.analyze(&req).unwrap();

        assert!(detector.score("clinician-17").is_some());
        assert!(detector.score("10.2.0.6").is_none());
    }

    #[test]
    fn test_whitelist_and_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cfg = BehaviorConfig {
            learning_secs: 0,
            profile_ttl_secs: 60,
            ..config()
        };
        let detector = BehaviorDetector::new(&cfg, &["10.2.0.7".to_string()], clock.clone());

        detector.analyze(&request("10.2.0.7", "/", AGENTS[0])).unwrap();
        assert_eq!(detector.profile_count(), 0);

        detector.analyze(&request("10.2.0.8", "/", AGENTS[0])).unwrap();
        assert_eq!(detector.profile_count(), 1);
        clock.advance(Duration::from_secs(61));
        assert_eq!(detector.prune(), 1);
    }

    #[test]
    fn test_capacity_exhausted() {
        let cfg = BehaviorConfig {
            max_profiles: 1,
            ..config()
        };
        let detector = BehaviorDetector::new(&cfg, &[], Arc::new(ManualClock::new()));
        detector.analyze(&request("10.2.0.9", "/", AGENTS[0])).unwrap();
        assert!(matches!(
            detector.analyze(&request("10.2.0.10", "/", AGENTS[0])),
            Err(DetectorError::CapacityExhausted { .. })
        ));
    }

    #[test]
    fn test_capacity_recovers_after_sweep() {
        let clock = Arc::new(ManualClock::new());
        let cfg = BehaviorConfig {
            max_profiles: 1,
            profile_ttl_secs: 60,
            ..config()
        };
        let detector = BehaviorDetector::new(&cfg, &[], clock.clone());
        detector.analyze(&request("10.2.0.20", "/", AGENTS[0])).unwrap();

        clock.advance(Duration::from_secs(61));
        assert!(detector.analyze(&request("10.2.0.21", "/", AGENTS[0])).is_err());
        assert_eq!(detector.profile_count(), 1);

        assert_eq!(detector.prune(), 1);
        assert!(detector.analyze(&request("10.2.0.21", "/", AGENTS[0])).is_ok());
    }
}
