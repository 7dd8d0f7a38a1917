//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → detectors built from their sections
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → rule set and whitelist swapped atomically
//!     → actor state (counters, blocks, profiles) is kept
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Invalid configuration is fatal at startup, ignored on reload
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ActorConfig, AdminConfig, AlertAction, BehaviorConfig, CorrelationConfig,
    CorrelationRuleConfig, CustomRuleConfig, ExportConfig, GatewayConfig, ListenerConfig,
    ObservabilityConfig, RulesConfig, TimeoutConfig, TrafficConfig, UpstreamConfig,
};
