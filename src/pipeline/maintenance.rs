//! Periodic sweep of detector state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::pipeline::SecurityPipeline;
use crate::security::{RuleEngine, TrafficAnalyzer};

/// Run one sweep and publish the blocked-actor gauges.
pub fn sweep(pipeline: &SecurityPipeline) {
    let report = pipeline.prune();
    let blocks = pipeline.active_blocks();
    metrics::set_blocked_actors(RuleEngine::NAME, blocks.rule_engine.len());
    metrics::set_blocked_actors(TrafficAnalyzer::NAME, blocks.traffic_analyzer.len());

    if report.total() > 0 {
        tracing::debug!(
            rule_engine = report.rule_engine,
            traffic_analyzer = report.traffic_analyzer,
            behavior_detector = report.behavior_detector,
            "Maintenance sweep evicted expired state"
        );
    }
}

/// Sweep every `interval` until shutdown.
pub fn spawn_sweeper(
    pipeline: Arc<SecurityPipeline>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => sweep(&pipeline),
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Maintenance sweeper stopped");
    })
}
