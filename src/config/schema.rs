//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::security::rules::RuleAction;
use crate::security::types::{EventCategory, Severity};

/// Root configuration for the security gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// The protected application the gateway forwards allowed traffic to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Actor identification and whitelisting.
    pub actors: ActorConfig,

    /// Firewall rule engine settings.
    pub rules: RulesConfig,

    /// Traffic rate analyzer settings.
    pub traffic: TrafficConfig,

    /// Behavioral anomaly detector settings.
    pub behavior: BehaviorConfig,

    /// Event correlation rules.
    pub correlation: CorrelationConfig,

    /// Export sink settings.
    pub export: ExportConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// The application behind the gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Interval between maintenance sweeps of detector state, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            sweep_interval_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Default admin key. Rejected by validation while the admin API is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// How actors are identified.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Prefer `X-Forwarded-For` / `X-Real-IP` over the peer address.
    pub trust_forwarded_headers: bool,

    /// Header carrying an authenticated user id, set by the hosting layer.
    pub user_header: String,

    /// Actors exempt from rate and behavioral analysis.
    pub whitelist: Vec<String>,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_headers: true,
            user_header: "x-user-id".to_string(),
            whitelist: Vec::new(),
        }
    }
}

/// Firewall rule engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    pub sql_injection: bool,
    pub xss: bool,
    pub path_traversal: bool,
    pub scanner: bool,
    pub command_injection: bool,

    /// Number of rule matches after which an actor is blocked outright.
    pub block_threshold: u32,

    /// How long a block lasts, in seconds.
    pub block_duration_secs: u64,

    /// Violations older than this no longer count toward the threshold.
    pub violation_retention_secs: u64,

    /// Maximum number of body bytes inspected on mutating requests.
    pub body_probe_limit_bytes: usize,

    /// Deadline for reading the body probe, in milliseconds.
    pub body_probe_timeout_ms: u64,

    /// Additional rules evaluated after the built-in groups.
    pub custom: Vec<CustomRuleConfig>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            sql_injection: true,
            xss: true,
            path_traversal: true,
            scanner: true,
            command_injection: true,
            block_threshold: 5,
            block_duration_secs: 3600,
            violation_retention_secs: 3600,
            body_probe_limit_bytes: 64 * 1024,
            body_probe_timeout_ms: 500,
            custom: Vec::new(),
        }
    }
}

/// A rule supplied through configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomRuleConfig {
    /// Unique rule identifier (logged, never returned to clients).
    pub id: String,

    /// Regular expression tested against the request probe.
    pub pattern: String,

    /// What to do on match.
    #[serde(default = "default_custom_action")]
    pub action: RuleAction,

    /// Severity score 0-10.
    #[serde(default = "default_custom_score")]
    pub score: u8,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_custom_action() -> RuleAction {
    RuleAction::Block
}

fn default_custom_score() -> u8 {
    5
}

fn default_true() -> bool {
    true
}

/// Traffic rate analyzer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Requests per minute above which an actor is blocked.
    pub requests_per_minute: u32,

    /// Sliding detection window, in seconds.
    pub window_secs: u64,

    /// How long a rate block lasts, in seconds.
    pub mitigation_secs: u64,

    /// Consecutive identical requests tolerated before throttling.
    pub repeat_signature_limit: u32,

    /// User-agent substrings that identify automation tools.
    pub automation_agents: Vec<String>,

    /// Cap on the number of actors tracked at once.
    pub max_tracked_actors: usize,

    /// Respond 429 to RateLimit verdicts instead of only logging them.
    pub enforce_rate_limit: bool,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
            window_secs: 60,
            mitigation_secs: 300,
            repeat_signature_limit: 20,
            automation_agents: vec![
                "curl".to_string(),
                "wget".to_string(),
                "python-requests".to_string(),
                "go-http-client".to_string(),
                "scrapy".to_string(),
                "httpclient".to_string(),
                "headless".to_string(),
            ],
            max_tracked_actors: 100_000,
            enforce_rate_limit: true,
        }
    }
}

/// What the pipeline does with a behavioral Alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertAction {
    /// Record the event and let the request through.
    Log,
    /// Reject the request with 403.
    Block,
}

/// Behavioral anomaly detector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Learning phase length from startup, in seconds.
    pub learning_secs: u64,

    /// Composite score above which an Alert is raised.
    pub anomaly_threshold: f64,

    /// Distinct-path ratio above which path diversity counts.
    pub high_diversity_threshold: f64,

    /// Factor value when more than one user agent is seen.
    pub multi_agent_penalty: f64,

    /// Factor value when request intervals are too regular.
    pub regular_interval_penalty: f64,

    /// Interval variance (seconds squared) below which timing is "too regular".
    pub interval_variance_threshold: f64,

    /// Number of recent intervals kept per profile.
    pub interval_history: usize,

    /// Requests needed before a profile is scored.
    pub min_requests: u64,

    /// Idle time after which a profile is evicted, in seconds.
    pub profile_ttl_secs: u64,

    /// Cap on the number of profiles held at once.
    pub max_profiles: usize,

    /// Policy applied to Alert verdicts.
    pub alert_action: AlertAction,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            learning_secs: 3600,
            anomaly_threshold: 0.7,
            high_diversity_threshold: 0.7,
            multi_agent_penalty: 0.8,
            regular_interval_penalty: 0.9,
            interval_variance_threshold: 0.01,
            interval_history: 20,
            min_requests: 10,
            profile_ttl_secs: 3600,
            max_profiles: 100_000,
            alert_action: AlertAction::Log,
        }
    }
}

/// Correlation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub rules: Vec<CorrelationRuleConfig>,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                CorrelationRuleConfig {
                    id: "injection-campaign".to_string(),
                    categories: vec![
                        EventCategory::SqlInjection,
                        EventCategory::Xss,
                        EventCategory::CommandInjection,
                    ],
                    threshold: 5,
                    window_secs: 300,
                    escalation: Severity::Critical,
                    per_actor: true,
                },
                CorrelationRuleConfig {
                    id: "reconnaissance".to_string(),
                    categories: vec![EventCategory::Scanner, EventCategory::PathTraversal],
                    threshold: 10,
                    window_secs: 600,
                    escalation: Severity::High,
                    per_actor: true,
                },
                CorrelationRuleConfig {
                    id: "distributed-abuse".to_string(),
                    categories: vec![EventCategory::RateAbuse],
                    threshold: 20,
                    window_secs: 300,
                    escalation: Severity::Critical,
                    per_actor: false,
                },
            ],
        }
    }
}

/// A time-windowed correlation rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorrelationRuleConfig {
    pub id: String,

    /// Event categories that count toward the threshold.
    pub categories: Vec<EventCategory>,

    /// Number of matching events needed to escalate.
    pub threshold: usize,

    /// Correlation window, in seconds.
    pub window_secs: u64,

    /// Severity of the synthesized event.
    pub escalation: Severity,

    /// Count events per actor rather than across all actors.
    #[serde(default)]
    pub per_actor: bool,
}

/// Export sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Enable export to the remote sink. When disabled, batches are logged.
    pub enabled: bool,

    /// Sink endpoint URL.
    pub endpoint: String,

    /// Bearer credential. May be supplied via `GATEWAY_EXPORT_TOKEN`.
    pub credential: String,

    /// Events per batch.
    pub batch_size: usize,

    /// Maximum time between flushes, in seconds.
    pub flush_interval_secs: u64,

    /// Capacity of the in-memory event queue.
    pub queue_capacity: usize,

    /// Events kept for the next flush after a failed export.
    pub retry_buffer: usize,

    /// Per-request timeout for the sink, in seconds.
    pub timeout_secs: u64,

    /// Attempts per flush before the batch is truncated into the retry buffer.
    pub max_attempts: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:9200/api/events".to_string(),
            credential: String::new(),
            batch_size: 100,
            flush_interval_secs: 10,
            queue_capacity: 10_000,
            retry_buffer: 1_000,
            timeout_secs: 5,
            max_attempts: 2,
        }
    }
}
