//! Time-windowed correlation rules.
//!
//! Each rule keeps the timestamps of recent qualifying events, either across
//! all actors or per actor. When the count within the window reaches the
//! threshold, one escalated event is synthesized. The rule stays quiet until
//! the event that anchored the last escalation has left the window.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::config::CorrelationRuleConfig;
use crate::security::types::{EventCategory, SecurityEvent, Severity};

/// Source recorded on synthesized events.
pub const CORRELATOR_SOURCE: &str = "correlator";

// Ten years; keeps the conversion to a chrono duration in range.
const MAX_WINDOW_SECS: u64 = 315_360_000;

#[derive(Debug, Clone)]
pub struct CorrelationRule {
    pub id: String,
    pub categories: Vec<EventCategory>,
    pub threshold: usize,
    pub window: ChronoDuration,
    pub escalation: Severity,
    pub per_actor: bool,
}

impl From<&CorrelationRuleConfig> for CorrelationRule {
    fn from(config: &CorrelationRuleConfig) -> Self {
        Self {
            id: config.id.clone(),
            categories: config.categories.clone(),
            threshold: config.threshold.max(1),
            window: ChronoDuration::seconds(config.window_secs.min(MAX_WINDOW_SECS) as i64),
            escalation: config.escalation,
            per_actor: config.per_actor,
        }
    }
}

impl CorrelationRule {
    fn matches(&self, event: &SecurityEvent) -> bool {
        self.categories.contains(&event.category)
    }
}

#[derive(Debug, Default)]
struct WindowState {
    events: VecDeque<(DateTime<Utc>, Uuid)>,
    /// Timestamp of the oldest event in the window when the rule last fired.
    fired_anchor: Option<DateTime<Utc>>,
}

impl WindowState {
    fn evict(&mut self, now: DateTime<Utc>, window: ChronoDuration) {
        while let Some(&(ts, _)) = self.events.front() {
            if now - ts >= window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Runs events through every correlation rule.
#[derive(Debug)]
pub struct CorrelationEngine {
    rules: Vec<CorrelationRule>,
    // Key: (rule index, actor or empty for global rules).
    windows: HashMap<(usize, String), WindowState>,
}

impl CorrelationEngine {
    pub fn new(rules: Vec<CorrelationRule>) -> Self {
        Self {
            rules,
            windows: HashMap::new(),
        }
    }

    pub fn from_config(rules: &[CorrelationRuleConfig]) -> Self {
        Self::new(rules.iter().map(CorrelationRule::from).collect())
    }

    /// Feed one event. Returns the escalated events it caused.
    ///
    /// Events produced by the correlator itself are ignored.
    pub fn ingest(&mut self, event: &SecurityEvent) -> Vec<SecurityEvent> {
        if event.source == CORRELATOR_SOURCE {
            return Vec::new();
        }

        let mut escalations = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.matches(event) {
                continue;
            }

            let key = if rule.per_actor {
                (index, event.actor.clone())
            } else {
                (index, String::new())
            };
            let state = self.windows.entry(key).or_default();

            state.events.push_back((event.timestamp, event.id));
            state.evict(event.timestamp, rule.window);

            if state.events.len() < rule.threshold {
                continue;
            }
            let Some(&(front, _)) = state.events.front() else {
                continue;
            };
            let rolled_forward = match state.fired_anchor {
                Some(anchor) => front > anchor,
                None => true,
            };
            if !rolled_forward {
                continue;
            }
            state.fired_anchor = Some(front);

            let contributing: Vec<String> =
                state.events.iter().map(|(_, id)| id.to_string()).collect();
            tracing::warn!(
                rule = %rule.id,
                events = contributing.len(),
                actor = %event.actor,
                severity = ?rule.escalation,
                "Correlation rule triggered"
            );

            let mut escalated = event.clone();
            escalated.id = Uuid::new_v4();
            escalated.category = EventCategory::AnomalousBehavior;
            escalated.severity = rule.escalation;
            escalated.score = rule.escalation.score();
            escalated.source = CORRELATOR_SOURCE.to_string();
            escalated.context.clear();
            let escalated = escalated
                .with_context("correlation_rule", rule.id.as_str())
                .with_context("window_secs", rule.window.num_seconds())
                .with_context("contributing_events", contributing);
            let escalated = if rule.per_actor {
                escalated
            } else {
                escalated.with_context("scope", "global")
            };
            escalations.push(escalated);
        }
        escalations
    }

    /// Drop windows whose newest event is older than their rule's window.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        let rules = &self.rules;
        self.windows.retain(|(index, _), state| {
            let Some(rule) = rules.get(*index) else {
                return false;
            };
            state.evict(now, rule.window);
            !state.events.is_empty()
        });
        before - self.windows.len()
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}
