//! Normalized request descriptor.
//!
//! Detectors see a `RequestInfo`, never a framework request, so the pipeline
//! works behind any transport. The HTTP layer builds one per request.

use std::net::IpAddr;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};

use crate::config::ActorConfig;

/// Everything a detector may inspect about a request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Transport peer address, if known.
    pub peer: Option<IpAddr>,
    /// Bounded prefix of the body for mutating methods; empty otherwise.
    pub body: Bytes,
    /// Key under which rate and rule state is tracked.
    pub actor: String,
    /// Authenticated user id supplied by the hosting layer.
    pub user_id: Option<String>,
}

impl RequestInfo {
    /// Build a descriptor, deriving the actor key from headers and peer.
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: Option<String>,
        headers: HeaderMap,
        peer: Option<IpAddr>,
        actors: &ActorConfig,
    ) -> Self {
        let actor = derive_actor(&headers, peer, actors.trust_forwarded_headers);
        let user_id = headers
            .get(actors.user_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Self {
            method,
            path: path.into(),
            query: query.filter(|q| !q.is_empty()),
            headers,
            peer,
            body: Bytes::new(),
            actor,
            user_id,
        }
    }

    /// Attach the body probe.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
    }

    /// Identity used for behavioral profiling: the user id when present.
    pub fn subject(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.actor)
    }

    /// Methods whose body is worth inspecting.
    pub fn is_mutating(&self) -> bool {
        is_mutating(&self.method)
    }
}

pub fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Derive the actor key.
///
/// The first entry of `X-Forwarded-For`, then `X-Real-IP`, then the peer.
pub fn derive_actor(headers: &HeaderMap, peer: Option<IpAddr>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(client) = forwarded {
            return client.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(client) = real_ip {
            return client.to_string();
        }
    }

    peer.map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
