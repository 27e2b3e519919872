//! Request gate
//!
//! Every request passes through [`gate_middleware`] before any handler runs.
//! Exempt paths (health and readiness when public) skip the gate entirely.
//! For everything else the gate, in order:
//! 1. refuses with `Unavailable` while the process is draining,
//! 2. charges the request to its rate-limit partition and refuses with
//!    `RateLimited` once the window quota is spent,
//! 3. refuses with `Unauthorized` unless the credential matched.
//!
//! Admitted requests have the credential removed from both the header and the
//! query string before they reach a handler.

use crate::auth::{strip_query_param, AuthOutcome, AuthPolicy};
use crate::error::GateError;
use crate::health::HealthChecker;
use crate::metrics::GatewayMetrics;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// The pieces of a request the gate looks at
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub peer: Option<IpAddr>,
}

/// Rate-limit partition a request is charged to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partition {
    /// Requests that presented the valid credential
    Credential,
    /// Everyone else, by client address
    Client(Option<IpAddr>),
}

impl Partition {
    pub fn key(&self) -> String {
        match self {
            Partition::Credential => "credential".to_string(),
            Partition::Client(Some(ip)) => format!("ip:{}", ip),
            Partition::Client(None) => "ip:unknown".to_string(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Partition::Credential => "credential",
            Partition::Client(_) => "client",
        }
    }
}

/// A passing gate decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub auth: AuthOutcome,
    /// Quota state, when the request was rate limited at all
    pub quota: Option<Quota>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
}

/// Authentication and rate-limit checkpoint
pub struct RequestGate {
    auth: AuthPolicy,
    limiter: Option<Arc<RateLimiter>>,
    health: HealthChecker,
    metrics: Arc<GatewayMetrics>,
    exempt_paths: Vec<String>,
    trusted_proxies: usize,
}

impl RequestGate {
    pub fn new(
        auth: AuthPolicy,
        limiter: Option<Arc<RateLimiter>>,
        health: HealthChecker,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            auth,
            limiter,
            health,
            metrics,
            exempt_paths: vec![],
            trusted_proxies: 0,
        }
    }

    /// Paths that bypass authentication and rate limiting
    pub fn with_exempt_paths(mut self, paths: Vec<String>) -> Self {
        self.exempt_paths = paths;
        self
    }

    /// Number of reverse proxies whose `X-Forwarded-For` entries are believed
    pub fn with_trusted_proxies(mut self, hops: usize) -> Self {
        self.trusted_proxies = hops;
        self
    }

    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|p| p == path)
    }

    pub fn auth(&self) -> &AuthPolicy {
        &self.auth
    }

    /// Decide whether a request may proceed
    pub fn evaluate(&self, request: &GateRequest<'_>) -> Result<Admission, GateError> {
        self.evaluate_at(request, Instant::now())
    }

    /// Same as [`evaluate`](Self::evaluate) with an explicit clock reading
    pub fn evaluate_at(
        &self,
        request: &GateRequest<'_>,
        now: Instant,
    ) -> Result<Admission, GateError> {
        if self.is_exempt(request.path) {
            return Ok(Admission {
                auth: AuthOutcome::Open,
                quota: None,
            });
        }

        if !self.health.is_ready() {
            return Err(GateError::Unavailable);
        }

        let auth = self.auth.check(request.headers, request.query);
        let partition = if auth == AuthOutcome::Authenticated {
            Partition::Credential
        } else {
            Partition::Client(client_ip(
                request.headers,
                request.peer,
                self.trusted_proxies,
            ))
        };

        let quota = match &self.limiter {
            Some(limiter) => match limiter.check_at(&partition.key(), now) {
                RateLimitDecision::Allowed {
                    remaining,
                    reset_after,
                } => Some(Quota {
                    limit: limiter.limit(),
                    remaining,
                    reset_secs: reset_after.as_secs(),
                }),
                RateLimitDecision::Limited { retry_after } => {
                    return Err(self.reject(
                        request.path,
                        &partition,
                        GateError::RateLimited { retry_after },
                    ));
                }
            },
            None => None,
        };

        if !auth.is_allowed() {
            return Err(self.reject(request.path, &partition, GateError::Unauthorized));
        }

        debug!(path = %request.path, partition = partition.kind(), "request admitted");
        Ok(Admission { auth, quota })
    }

    fn reject(&self, path: &str, partition: &Partition, error: GateError) -> GateError {
        warn!(
            path = %path,
            partition = partition.kind(),
            reason = error.reason(),
            "request rejected"
        );
        self.metrics.record_rejection(error.reason());
        error
    }

    /// Remove the credential from an admitted request
    fn scrub(&self, req: &mut Request<Body>) {
        req.headers_mut().remove(self.auth.header_name());

        let Some(name) = self.auth.query_param_name() else {
            return;
        };
        if let Some(uri) = strip_credential_from_uri(req.uri(), name) {
            *req.uri_mut() = uri;
        }
    }
}

/// Client address as seen by the outermost trusted proxy.
///
/// Each trusted proxy appends the address it received the connection from, so
/// with `trusted_proxies` hops the client is that many entries from the right.
/// Anything further left is client-supplied and ignored. Falls back to the
/// socket peer when no proxy is trusted or the header is short or unreadable.
pub fn client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: usize,
) -> Option<IpAddr> {
    if trusted_proxies == 0 {
        return peer;
    }

    let forwarded: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .collect();

    forwarded
        .len()
        .checked_sub(trusted_proxies)
        .and_then(|i| forwarded[i].parse::<IpAddr>().ok())
        .or(peer)
}

/// Rebuild `uri` without the named query parameter, or `None` if it is absent
fn strip_credential_from_uri(uri: &Uri, name: &str) -> Option<Uri> {
    let query = uri.query()?;
    let remaining = strip_query_param(Some(query), name);
    if remaining.as_deref() == Some(query) {
        return None;
    }

    let path_and_query = match remaining {
        Some(q) => format!("{}?{}", uri.path(), q),
        None => uri.path().to_string(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}

/// Axum middleware running the gate in front of every handler
pub async fn gate_middleware(
    State(gate): State<Arc<RequestGate>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let decision = gate.evaluate(&GateRequest {
        path: req.uri().path(),
        query: req.uri().query(),
        headers: req.headers(),
        peer,
    });

    let admission = match decision {
        Ok(admission) => admission,
        Err(error) => return error.into_response(),
    };

    if !gate.is_exempt(req.uri().path()) {
        gate.scrub(&mut req);
    }

    let quota = admission.quota.clone();
    req.extensions_mut().insert(admission);

    let mut response = next.run(req).await;

    if let Some(quota) = quota {
        let headers = response.headers_mut();
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(quota.limit));
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(quota.remaining));
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from(quota.reset_secs));
    }

    response
}

/// Periodically drop expired rate-limit windows
pub fn spawn_pruner(limiter: Arc<RateLimiter>, metrics: Arc<GatewayMetrics>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(limiter.window());
        loop {
            interval.tick().await;
            let removed = limiter.prune(Instant::now());
            if removed > 0 {
                debug!(removed, "pruned expired rate limit windows");
            }
            metrics.set_rate_limit_partitions(limiter.tracked());
        }
    })
}
