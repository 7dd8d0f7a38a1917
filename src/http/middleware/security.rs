//! Security middleware.
//!
//! Adapts an axum request into a [`RequestInfo`], runs the pipeline, and
//! either answers with a denial or passes the request on and decorates the
//! response with security headers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::config::{ActorConfig, GatewayConfig};
use crate::http::request::request_id;
use crate::http::response::denial_response;
use crate::pipeline::{Decision, SecurityPipeline};
use crate::security::headers::apply_security_headers;
use crate::security::limits::probe_body;
use crate::security::request::{is_mutating, RequestInfo};

/// Shared state for [`security_middleware`].
#[derive(Clone)]
pub struct SecurityState {
    pub pipeline: Arc<SecurityPipeline>,
    pub actors: Arc<ActorConfig>,
    pub body_limit: usize,
    pub body_timeout: Duration,
}

impl SecurityState {
    pub fn new(pipeline: Arc<SecurityPipeline>, config: &GatewayConfig) -> Self {
        Self {
            pipeline,
            actors: Arc::new(config.actors.clone()),
            body_limit: config.rules.body_probe_limit_bytes,
            body_timeout: Duration::from_millis(config.rules.body_probe_timeout_ms),
        }
    }
}

pub async fn security_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request_id(request.headers());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());

    let (parts, body) = request.into_parts();
    let (probe, body): (Bytes, Body) = if is_mutating(&parts.method) {
        let probed = probe_body(&parts.headers, body, state.body_limit, state.body_timeout).await;
        (probed.probe, probed.body)
    } else {
        (Bytes::new(), body)
    };

    let info = RequestInfo::new(
        parts.method.clone(),
        parts.uri.path(),
        parts.uri.query().map(str::to_string),
        parts.headers.clone(),
        peer,
        &state.actors,
    )
    .with_body(probe);

    match state.pipeline.inspect(&info) {
        Decision::Allow => {
            let mut response = next.run(Request::from_parts(parts, body)).await;
            apply_security_headers(response.headers_mut());
            response
        }
        Decision::Deny(denial) => {
            tracing::warn!(
                request_id = %request_id,
                actor = %info.actor,
                detector = denial.detector,
                status = denial.status.as_u16(),
                method = %info.method,
                path = %info.path,
                "Request denied"
            );
            denial_response(&denial, &request_id)
        }
    }
}
