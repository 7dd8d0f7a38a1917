//! Admin API.
//!
//! Bearer-protected operator endpoints, served on their own listener:
//! - `GET /admin/status`
//! - `GET /admin/blocks`
//! - `GET /admin/stats`
//! - `DELETE /admin/blocks/{actor}`

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::pipeline::SecurityPipeline;

/// Shared state of the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub pipeline: Arc<SecurityPipeline>,
    pub api_key: Arc<str>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(pipeline: Arc<SecurityPipeline>, api_key: &str) -> Self {
        Self {
            pipeline,
            api_key: Arc::from(api_key),
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/blocks", get(get_blocks))
        .route("/admin/stats", get(get_stats))
        .route("/admin/blocks/{actor}", delete(delete_block))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::correlation::CorrelatorHandle;
    use crate::security::SystemClock;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let (handle, _rx) = CorrelatorHandle::detached(16);
        let pipeline =
            SecurityPipeline::new(&GatewayConfig::default(), handle, Arc::new(SystemClock)).unwrap();
        setup_admin_router(AdminState::new(Arc::new(pipeline), "secret"))
    }

    fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let app = router();
        for token in [None, Some("wrong"), Some("")] {
            let resp = app
                .clone()
                .oneshot(request(Method::GET, "/admin/status", token))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_status_reports_learning_mode() {
        let resp = router()
            .oneshot(request(Method::GET, "/admin/status", Some("secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let status: handlers::SystemStatus = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(status.status, "operational");
        assert_eq!(status.behavior_mode, crate::security::DetectorMode::Learning);
    }

    #[tokio::test]
    async fn test_unblock_unknown_actor_is_not_found() {
        let resp = router()
            .oneshot(request(Method::DELETE, "/admin/blocks/10.9.9.9", Some("secret")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
