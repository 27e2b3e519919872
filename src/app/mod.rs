//! HTTP application: shared state, local endpoints and the middleware stack
//!
//! Layer order, outermost first: CORS (optional), tracing, request metrics,
//! the request gate, then the handlers.

use crate::auth::AuthPolicy;
use crate::config::GatewayConfig;
use crate::gate::{gate_middleware, RequestGate};
use crate::health::{HealthChecker, ReadinessStatus};
use crate::metrics::GatewayMetrics;
use crate::proxy::{ProxyService, Upstream};
use crate::rate_limit::RateLimiter;
use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub gate: Arc<RequestGate>,
    pub health: HealthChecker,
    pub metrics: Arc<GatewayMetrics>,
    pub proxy: Arc<ProxyService>,
    pub limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    /// Wire every component from a validated configuration
    pub fn from_config(config: GatewayConfig) -> crate::Result<Self> {
        let metrics = Arc::new(GatewayMetrics::new()?);
        let health = HealthChecker::new(
            &config.health.service_name,
            config.auth.require_auth,
            config.rate_limit.describe(),
        );
        let limiter = RateLimiter::from_config(&config.rate_limit).map(Arc::new);

        let gate = RequestGate::new(
            AuthPolicy::new(&config.auth),
            limiter.clone(),
            health.clone(),
            metrics.clone(),
        )
        .with_exempt_paths(config.exempt_paths())
        .with_trusted_proxies(config.server.trusted_proxies);

        let proxy = ProxyService::new(
            config.upstream.url.as_deref().map(Upstream::new),
            Duration::from_secs(config.server.timeout),
        );

        Ok(Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            health,
            metrics,
            proxy: Arc::new(proxy),
            limiter,
        })
    }
}

/// The full router: local endpoints plus the upstream proxy as fallback
pub fn build_router(state: AppState) -> Router {
    compose(state, Router::new().fallback(proxy_handler))
}

/// Put `handlers` behind the gate alongside the local endpoints
pub fn compose(state: AppState, handlers: Router<AppState>) -> Router {
    let config = state.config.clone();

    let mut router = Router::new().route("/", get(root_handler));

    if config.health.enabled {
        router = router
            .route(&config.health.path, get(health_handler))
            .route(&config.health.ready_path, get(ready_handler));
    }
    if config.metrics.enabled {
        router = router.route(&config.metrics.path, get(metrics_handler));
    }

    let router = router
        .merge(handlers)
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            gate_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_metrics,
        ))
        .layer(TraceLayer::new_for_http());

    let router = if config.server.cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

/// Record status and latency for every request, rejected ones included.
///
/// Requests are labelled by route template, never by raw path; everything that
/// falls through to the proxy shares one label.
async fn track_metrics(
    State(metrics): State<Arc<GatewayMetrics>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string());

    let response = next.run(req).await;

    metrics.record_request(
        &method,
        route.as_deref(),
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}

/// Service description
async fn root_handler(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.config;
    let auth = if config.auth.require_auth {
        match state.gate.auth().query_param_name() {
            Some(param) => format!(
                "Use {} header or {} query parameter",
                config.auth.header_name, param
            ),
            None => format!("Use {} header", config.auth.header_name),
        }
    } else {
        "No authentication required".to_string()
    };

    let mut endpoints = serde_json::Map::new();
    if config.health.enabled {
        endpoints.insert(config.health.path.clone(), json!("Health check"));
        endpoints.insert(config.health.ready_path.clone(), json!("Readiness check"));
    }
    if config.metrics.enabled {
        endpoints.insert(config.metrics.path.clone(), json!("Prometheus metrics"));
    }
    if state.proxy.upstream().is_some() {
        endpoints.insert("/mcp".to_string(), json!("MCP protocol endpoint"));
    }

    Json(json!({
        "name": "HyperLiquid MCP Gate",
        "service": state.health.service(),
        "version": state.health.version(),
        "auth": auth,
        "rate_limit": config.rate_limit.describe(),
        "endpoints": endpoints,
    }))
}

/// Liveness: always 200 while the process can answer
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.liveness()))
}

/// Readiness: 503 once draining has begun
async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let readiness = state.health.readiness();
    let status = if readiness.status == ReadinessStatus::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    if let Some(limiter) = &state.limiter {
        state.metrics.set_rate_limit_partitions(limiter.tracked());
    }

    match state.metrics.prometheus_output() {
        Ok(output) => (StatusCode::OK, output).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Forward everything without a local route to the upstream MCP server
async fn proxy_handler(State(state): State<AppState>, req: Request<Body>) -> Response {
    match state.proxy.forward(req).await {
        Ok(response) => response,
        Err(e) => {
            if state.proxy.upstream().is_some() {
                warn!("Upstream request failed: {}", e);
            }
            e.into_response()
        }
    }
}
