//! Verdicts, events and errors shared by every detector.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::security::request::RequestInfo;

/// Outcome of a single detector for a single request.
///
/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Log,
    Alert,
    RateLimit,
    Block,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Log => "log",
            Verdict::Alert => "alert",
            Verdict::RateLimit => "rate_limit",
            Verdict::Block => "block",
        }
    }
}

/// What kind of activity an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventCategory {
    SqlInjection,
    Xss,
    PathTraversal,
    Scanner,
    CommandInjection,
    Custom,
    /// Request from an actor already on a block-list.
    ActorBlocked,
    RateAbuse,
    Automation,
    RepeatedRequest,
    /// Raised by the behavioral detector.
    BehavioralAnomaly,
    /// Synthesized by the correlator.
    AnomalousBehavior,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::SqlInjection => "sql-injection",
            EventCategory::Xss => "xss",
            EventCategory::PathTraversal => "path-traversal",
            EventCategory::Scanner => "scanner",
            EventCategory::CommandInjection => "command-injection",
            EventCategory::Custom => "custom",
            EventCategory::ActorBlocked => "actor-blocked",
            EventCategory::RateAbuse => "rate-abuse",
            EventCategory::Automation => "automation",
            EventCategory::RepeatedRequest => "repeated-request",
            EventCategory::BehavioralAnomaly => "behavioral-anomaly",
            EventCategory::AnomalousBehavior => "anomalous-behavior",
        }
    }
}

/// Severity level of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a 0-10 severity score onto a level.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=3 => Severity::Low,
            4..=6 => Severity::Medium,
            7..=8 => Severity::High,
            _ => Severity::Critical,
        }
    }

    /// Representative score for a level, used for synthesized events.
    pub fn score(&self) -> u8 {
        match self {
            Severity::Low => 2,
            Severity::Medium => 5,
            Severity::High => 8,
            Severity::Critical => 10,
        }
    }
}

/// An immutable record of something a detector decided.
///
/// This is also the export wire format: each field serializes under its own
/// name and timestamps keep nanosecond precision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub category: EventCategory,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// Actor key (IP address or session/user key).
    pub actor: String,
    pub method: String,
    pub path: String,
    pub user_agent: Option<String>,
    /// Rule id or detector id that produced the event.
    pub source: String,
    /// Severity score 0-10.
    pub score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl SecurityEvent {
    /// Create an event describing `request`.
    pub fn from_request(
        request: &RequestInfo,
        category: EventCategory,
        source: impl Into<String>,
        score: u8,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let score = score.min(10);
        Self {
            id: Uuid::new_v4(),
            category,
            severity: Severity::from_score(score),
            timestamp,
            actor: request.actor.clone(),
            method: request.method.to_string(),
            path: request.path.clone(),
            user_agent: request.user_agent().map(str::to_string),
            source: source.into(),
            score,
            geo: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a context entry.
    pub fn with_context(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// What a detector concluded about one request.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub verdict: Verdict,
    /// Present for every non-Allow verdict.
    pub event: Option<SecurityEvent>,
    /// How long the client should wait before retrying, for rate-based verdicts.
    pub retry_after: Option<Duration>,
}

impl Assessment {
    pub fn allow() -> Self {
        Self {
            verdict: Verdict::Allow,
            event: None,
            retry_after: None,
        }
    }

    pub fn new(verdict: Verdict, event: SecurityEvent) -> Self {
        Self {
            verdict,
            event: Some(event),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_allow(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

/// Failures inside a detector. The pipeline treats all of them as Allow.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The detector refused to track another actor.
    #[error("{detector} is tracking {tracked} actors, capacity exhausted")]
    CapacityExhausted { detector: &'static str, tracked: usize },

    /// The detector panicked; the message is the panic payload if it was a string.
    #[error("{detector} panicked: {message}")]
    Panicked { detector: &'static str, message: String },
}
