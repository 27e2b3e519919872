//! Proxy module for forwarding admitted requests to the upstream MCP server
//!
//! - Hop-by-hop headers are dropped and `Host` is rewritten to the upstream
//! - Request bodies are buffered, response bodies are streamed back so
//!   server-sent events keep flowing
//! - Each upstream call is bounded by the configured timeout

use crate::error::ProxyError;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{debug, warn};

/// Largest request body forwarded upstream
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Upstream target
#[derive(Debug, Clone)]
pub struct Upstream {
    base: String,
}

impl Upstream {
    pub fn new(url: &str) -> Self {
        Self {
            base: url.trim_end_matches('/').to_string(),
        }
    }

    /// Get the upstream URL for a request path
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let path_part = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base, path_part, q),
            _ => format!("{}{}", self.base, path_part),
        }
    }
}

/// Proxy service for forwarding requests
#[derive(Clone)]
pub struct ProxyService {
    client: Client<HttpConnector, BoxBody<Bytes, hyper::Error>>,
    upstream: Option<Upstream>,
    timeout: Duration,
}

impl ProxyService {
    pub fn new(upstream: Option<Upstream>, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            client,
            upstream,
            timeout,
        }
    }

    pub fn upstream(&self) -> Option<&Upstream> {
        self.upstream.as_ref()
    }

    /// Forward a request to the upstream
    pub async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let upstream = self.upstream.as_ref().ok_or(ProxyError::NoRoute)?;
        let target_url = upstream.target_url(req.uri().path(), req.uri().query());

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&target_url);

        if let Some(headers) = builder.headers_mut() {
            for (key, value) in parts.headers.iter() {
                if !is_hop_by_hop_header(key.as_str()) {
                    headers.append(key.clone(), value.clone());
                }
            }

            match extract_host_from_url(&target_url) {
                Some(host) => match HeaderValue::from_str(&host) {
                    Ok(value) => {
                        headers.insert(header::HOST, value);
                    }
                    Err(e) => warn!("Failed to parse upstream host '{}': {}", host, e),
                },
                None => warn!("Failed to extract host from upstream URL '{}'", target_url),
            }
        }

        let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| ProxyError::BadRequest(format!("Failed to read request body: {}", e)))?;

        let boxed_body = Full::new(body_bytes).map_err(|e| match e {}).boxed();

        let upstream_req = builder
            .body(boxed_body)
            .map_err(|e| ProxyError::BadRequest(e.to_string()))?;

        debug!(target = %target_url, "forwarding request upstream");

        let response = tokio::time::timeout(self.timeout, self.client.request(upstream_req))
            .await
            .map_err(|_| ProxyError::Timeout)?
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop_headers(&mut parts.headers);

        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Drop hop-by-hop headers from an upstream response
fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let hop_by_hop: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();
    for name in hop_by_hop {
        headers.remove(name);
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded.
///
/// `host` is included so the client's value never reaches the upstream; it is
/// set from the upstream URL after filtering.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

/// Extract host and optional port from a URL string
fn extract_host_from_url(url: &str) -> Option<String> {
    url.parse::<axum::http::Uri>()
        .ok()
        .and_then(|uri| uri.authority().map(|a| a.to_string()))
}
