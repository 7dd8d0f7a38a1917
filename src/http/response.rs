//! Denial responses.
//!
//! # Responsibilities
//! - Render a denial as the fixed JSON error body
//! - Set `Retry-After` for rate-based denials
//! - Carry the same security headers as allowed responses
//!
//! # Design Decisions
//! - The body never names a rule, pattern or detector

use std::time::Duration;

use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::Denial;
use crate::security::headers::apply_security_headers;

pub const DENIAL_ERROR: &str = "Security Policy Violation";

/// JSON body of a denied request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenialBody {
    pub error: String,
    pub message: String,
    pub timestamp: String,
    pub request_id: String,
}

/// Whole seconds, rounded up, never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

pub fn denial_response(denial: &Denial, request_id: &str) -> Response {
    let body = DenialBody {
        error: DENIAL_ERROR.to_string(),
        message: denial.reason.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        request_id: request_id.to_string(),
    };

    let mut response = (denial.status, Json(body)).into_response();
    let headers = response.headers_mut();
    if let Some(retry_after) = denial.retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
    }
    apply_security_headers(headers);
    response
}
