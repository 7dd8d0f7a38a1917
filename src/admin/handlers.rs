use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::pipeline::{BlocksReport, PipelineStats};
use crate::security::DetectorMode;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub behavior_mode: DetectorMode,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        behavior_mode: state.pipeline.behavior_detector().mode(),
    })
}

pub async fn get_blocks(State(state): State<AdminState>) -> Json<BlocksReport> {
    Json(state.pipeline.active_blocks())
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<PipelineStats> {
    Json(state.pipeline.stats())
}

pub async fn delete_block(
    State(state): State<AdminState>,
    Path(actor): Path<String>,
) -> StatusCode {
    if state.pipeline.unblock(&actor) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
