//! Pattern-based firewall rule engine.
//!
//! # Responsibilities
//! - Compile the enabled built-in groups and custom rules into a `RuleSet`
//! - Build a probe string from method, path, query, user agent and body
//! - Return the verdict of the first matching rule
//! - Count violations per actor and block repeat offenders
//!
//! # Design Decisions
//! - Declaration order decides: first match wins, never the most severe
//! - The rule set is immutable; reload swaps the whole set atomically
//! - Per-actor counters are updated under the actor's own map entry

pub mod builtin;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RulesConfig;
use crate::security::blocklist::BlockList;
use crate::security::clock::Clock;
use crate::security::request::RequestInfo;
use crate::security::types::{Assessment, DetectorError, EventCategory, SecurityEvent, Verdict};

/// What happens when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Block,
    Log,
    RateLimit,
}

impl RuleAction {
    pub fn verdict(self) -> Verdict {
        match self {
            RuleAction::Block => Verdict::Block,
            RuleAction::Log => Verdict::Log,
            RuleAction::RateLimit => Verdict::RateLimit,
        }
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub category: EventCategory,
    pub description: String,
    pub pattern: Regex,
    pub action: RuleAction,
    /// Severity score 0-10.
    pub score: u8,
    pub enabled: bool,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        category: EventCategory,
        pattern: &str,
        action: RuleAction,
        score: u8,
    ) -> Result<Self, RuleError> {
        let id = id.into();
        let pattern = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
            id: id.clone(),
            source,
        })?;

        Ok(Self {
            description: id.clone(),
            id,
            category,
            pattern,
            action,
            score: score.min(10),
            enabled: true,
        })
    }
}

/// Errors building a rule set.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{id}' has an invalid pattern: {source}")]
    InvalidPattern {
        id: String,
        #[source]
        source: regex::Error,
    },
}

/// An ordered, read-only collection of rules.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Assemble the enabled built-in groups followed by the custom rules.
    pub fn from_config(config: &RulesConfig) -> Result<Self, RuleError> {
        let enabled = [
            config.sql_injection,
            config.xss,
            config.path_traversal,
            config.scanner,
            config.command_injection,
        ];

        let mut rules = Vec::new();
        for ((category, defs), on) in builtin::groups().into_iter().zip(enabled) {
            for def in defs {
                let mut rule = Rule::new(def.id, category, def.pattern, def.action, def.score)?;
                rule.description = def.description.to_string();
                rule.enabled = on;
                rules.push(rule);
            }
        }

        for custom in &config.custom {
            let mut rule = Rule::new(
                custom.id.clone(),
                EventCategory::Custom,
                &custom.pattern,
                custom.action,
                custom.score,
            )?;
            rule.enabled = custom.enabled;
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    /// The first enabled rule matching `probe`.
    pub fn first_match(&self, probe: &str) -> Option<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.enabled)
            .find(|r| r.pattern.is_match(probe))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.rules.iter().filter(|r| r.enabled).count()
    }
}

#[derive(Debug)]
struct ViolationState {
    count: u32,
    last: Instant,
}

/// The firewall rule engine.
pub struct RuleEngine {
    rules: ArcSwap<RuleSet>,
    violations: DashMap<String, ViolationState>,
    blocks: BlockList,
    block_threshold: u32,
    block_duration: Duration,
    retention: Duration,
    body_limit: usize,
    clock: Arc<dyn Clock>,
}

impl RuleEngine {
    pub const NAME: &'static str = "rule_engine";

    /// Build an engine with the rule set described by `config`.
    pub fn new(config: &RulesConfig, clock: Arc<dyn Clock>) -> Result<Self, RuleError> {
        Ok(Self::with_rules(RuleSet::from_config(config)?, config, clock))
    }

    /// Build an engine around an explicit rule set.
    pub fn with_rules(rules: RuleSet, config: &RulesConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
            violations: DashMap::new(),
            blocks: BlockList::new(),
            block_threshold: config.block_threshold.max(1),
            block_duration: Duration::from_secs(config.block_duration_secs),
            retention: Duration::from_secs(config.violation_retention_secs),
            body_limit: config.body_probe_limit_bytes,
            clock,
        }
    }

    /// Evaluate a request.
    pub fn evaluate(&self, request: &RequestInfo) -> Result<Assessment, DetectorError> {
        let now = self.clock.now();

        if let Some(remaining) = self.blocks.remaining(&request.actor, now) {
            let event = SecurityEvent::from_request(
                request,
                EventCategory::ActorBlocked,
                Self::NAME,
                6,
                self.clock.wall(),
            )
            .with_context("reason", "actor blocked")
            .with_context("remaining_secs", remaining.as_secs());
            return Ok(Assessment::new(Verdict::Block, event).with_retry_after(remaining));
        }

        let rules = self.rules.load();
        let probe = compose_probe(request, self.body_limit);
        let Some(rule) = rules.first_match(&probe) else {
            return Ok(Assessment::allow());
        };

        let violations = {
            let mut state = self
                .violations
                .entry(request.actor.clone())
                .or_insert(ViolationState { count: 0, last: now });
            if now.saturating_duration_since(state.last) > self.retention {
                state.count = 0;
            }
            state.count += 1;
            state.last = now;
            state.count
        };

        let mut event = SecurityEvent::from_request(
            request,
            rule.category,
            rule.id.clone(),
            rule.score,
            self.clock.wall(),
        )
        .with_context("description", rule.description.clone())
        .with_context("violations", violations);

        if violations >= self.block_threshold {
            self.blocks.block(&request.actor, now + self.block_duration);
            event = event.with_context("actor_blocked", true);
            tracing::warn!(
                actor = %request.actor,
                rule = %rule.id,
                violations,
                block_secs = self.block_duration.as_secs(),
                "Violation threshold reached, actor blocked"
            );
        } else {
            tracing::info!(
                actor = %request.actor,
                rule = %rule.id,
                violations,
                action = ?rule.action,
                "Rule matched"
            );
        }

        Ok(Assessment::new(rule.action.verdict(), event))
    }

    /// Replace the rule set. Counters and blocks are kept.
    pub fn reload(&self, config: &RulesConfig) -> Result<(), RuleError> {
        let rules = RuleSet::from_config(config)?;
        tracing::info!(rules = rules.len(), enabled = rules.enabled_count(), "Rule set reloaded");
        self.rules.store(Arc::new(rules));
        Ok(())
    }

    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    /// Lift `actor`'s block and forget its violations.
    pub fn unblock(&self, actor: &str) -> bool {
        self.violations.remove(actor);
        self.blocks.unblock(actor)
    }

    /// Violations currently counted against `actor`.
    pub fn violations(&self, actor: &str) -> u32 {
        self.violations.get(actor).map(|s| s.count).unwrap_or(0)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.load().len()
    }

    /// Drop expired blocks and counters idle beyond the retention horizon.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let before = self.violations.len();
        self.violations
            .retain(|_, state| now.saturating_duration_since(state.last) <= self.retention);
        let removed = before.saturating_sub(self.violations.len());
        removed + self.blocks.prune(now)
    }
}

/// Build the string the rules are tested against.
///
/// Path and query appear raw and, when different, percent-decoded. The body
/// contributes at most `body_limit` bytes and only for mutating methods.
fn compose_probe(request: &RequestInfo, body_limit: usize) -> String {
    let mut target = request.path.clone();
    if let Some(query) = &request.query {
        target.push('?');
        target.push_str(query);
    }

    let mut probe = String::with_capacity(target.len() * 2 + 128);
    probe.push_str(request.method.as_str());
    probe.push(' ');
    probe.push_str(&target);

    let mut decoded = target.replace('+', " ");
    for _ in 0..2 {
        match urlencoding::decode(&decoded) {
            Ok(next) if next != decoded => decoded = next.into_owned(),
            _ => break,
        }
    }
    if decoded != target {
        probe.push(' ');
        probe.push_str(&decoded);
    }

    if let Some(agent) = request.user_agent() {
        probe.push(' ');
        probe.push_str(agent);
    }

    if request.is_mutating() && !request.body.is_empty() {
        let end = request.body.len().min(body_limit);
        probe.push(' ');
        probe.push_str(&String::from_utf8_lossy(&request.body[..end]));
    }

    probe
}
