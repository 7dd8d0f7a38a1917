//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the forwarding handler
//! - Wire up middleware (request ID, tracing, concurrency cap, timeout, security pipeline)
//! - Start the correlator, the maintenance sweep and the admin API
//! - Apply configuration reloads to the running pipeline
//! - Forward allowed requests to the upstream application

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{uri::Authority, Request, StatusCode, Uri, Version},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::GatewayConfig;
use crate::correlation::{self, CorrelatorHandle, ExportSink, HttpSink, LogSink};
use crate::error::GatewayError;
use crate::http::middleware::{security_middleware, SecurityState};
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::lifecycle::Shutdown;
use crate::pipeline::{maintenance, SecurityPipeline};
use crate::security::headers::prepare_upstream_headers;
use crate::security::{SecurityEvent, SystemClock};

/// State of the forwarding handler.
#[derive(Clone)]
pub struct UpstreamState {
    pub client: Client<HttpConnector, Body>,
    pub upstream: Authority,
}

/// HTTP server for the security gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    pipeline: Arc<SecurityPipeline>,
    events: mpsc::Receiver<SecurityEvent>,
    sink: Arc<dyn ExportSink>,
}

impl HttpServer {
    /// Build the pipeline and router. Nothing runs until [`HttpServer::run`].
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let upstream: Authority = config
            .upstream
            .address
            .parse()
            .map_err(|_| GatewayError::Upstream(config.upstream.address.clone()))?;

        let sink: Arc<dyn ExportSink> = if config.export.enabled {
            Arc::new(HttpSink::new(&config.export)?)
        } else {
            Arc::new(LogSink)
        };

        let (handle, events) = CorrelatorHandle::detached(config.export.queue_capacity);
        let pipeline = Arc::new(SecurityPipeline::new(&config, handle, Arc::new(SystemClock))?);

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let router = Self::build_router(
            &config,
            UpstreamState { client, upstream },
            SecurityState::new(pipeline.clone(), &config),
        );

        Ok(Self {
            router,
            config,
            pipeline,
            events,
            sink,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, upstream: UpstreamState, security: SecurityState) -> Router {
        Router::new()
            .route("/{*path}", any(forward_handler))
            .route("/", any(forward_handler))
            .with_state(upstream)
            .layer(middleware::from_fn_with_state(security, security_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
            .layer(TraceLayer::new_for_http())
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Configurations received on `config_updates` are applied to the running
    /// pipeline; an invalid one is logged and the current one kept.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), GatewayError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.address,
            "HTTP server starting"
        );

        // Background tasks outlive the listener so queued events get flushed.
        let background = Shutdown::new();
        let correlator = correlation::start(
            self.events,
            &self.config.export,
            &self.config.correlation.rules,
            self.sink,
            background.subscribe(),
        );
        let sweeper = maintenance::spawn_sweeper(
            self.pipeline.clone(),
            Duration::from_secs(self.config.timeouts.sweep_interval_secs),
            background.subscribe(),
        );

        let reload_pipeline = self.pipeline.clone();
        let reloader = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                if let Err(e) = reload_pipeline.apply_config(&config) {
                    tracing::warn!(error = %e, "Rejected configuration reload, keeping current rules");
                }
            }
        });

        let admin = if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            let router = setup_admin_router(AdminState::new(
                self.pipeline.clone(),
                &self.config.admin.api_key,
            ));
            let mut admin_shutdown = background.subscribe();
            Some(tokio::spawn(async move {
                let served = axum::serve(admin_listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            }))
        } else {
            None
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await;

        reloader.abort();
        background.trigger();
        if let Some(admin) = admin {
            let _ = admin.await;
        }
        let _ = sweeper.await;
        if let Err(e) = correlator.await {
            tracing::error!(error = %e, "Correlator task failed");
        }

        served?;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn pipeline(&self) -> Arc<SecurityPipeline> {
        self.pipeline.clone()
    }
}

/// Forward an allowed request to the upstream application.
async fn forward_handler(
    State(state): State<UpstreamState>,
    request: Request<Body>,
) -> Response {
    let request_id = request_id(request.headers());
    let (mut parts, body) = request.into_parts();

    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    prepare_upstream_headers(&mut parts.headers, &client_ip);

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = match Uri::builder()
        .scheme("http")
        .authority(state.upstream.clone())
        .path_and_query(path_and_query)
        .build()
    {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Cannot rewrite request URI");
            return (StatusCode::BAD_REQUEST, "Invalid request target").into_response();
        }
    };
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
