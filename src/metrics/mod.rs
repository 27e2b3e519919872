//! Metrics module for Prometheus
//!
//! - Request count by method, route, and status
//! - Request latency histogram
//!
//! Label values come from fixed sets (standard methods, registered route
//! templates) so clients cannot mint new series.
//! - Gate rejections by reason
//! - Tracked rate-limit partitions

use axum::http::Method;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Route label for requests that matched no local route
pub const UNMATCHED_ROUTE: &str = "<proxied>";

/// Gate metrics collector
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    request_counter: CounterVec,
    request_latency: HistogramVec,
    rejection_counter: CounterVec,
    rate_limit_partitions: IntGauge,
    total_requests: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl GatewayMetrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let request_counter = CounterVec::new(
            Opts::new("gate_requests_total", "Total number of requests"),
            &["method", "route", "status"],
        )?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new("gate_request_latency_seconds", "Request latency in seconds")
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
            &["method", "route"],
        )?;

        let rejection_counter = CounterVec::new(
            Opts::new("gate_rejections_total", "Requests refused by the gate"),
            &["reason"],
        )?;

        let rate_limit_partitions = IntGauge::new(
            "gate_rate_limit_partitions",
            "Rate limit partitions currently tracked",
        )?;

        registry.register(Box::new(request_counter.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;
        registry.register(Box::new(rejection_counter.clone()))?;
        registry.register(Box::new(rate_limit_partitions.clone()))?;

        Ok(Self {
            registry,
            request_counter,
            request_latency,
            rejection_counter,
            rate_limit_partitions,
            total_requests: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Record a request with its status and latency. `route` is the matched
    /// route template, `None` for the proxy fallback.
    pub fn record_request(
        &self,
        method: &Method,
        route: Option<&str>,
        status: u16,
        latency: Duration,
    ) {
        let status_str = status.to_string();
        let method = method_label(method);
        let route = route.unwrap_or(UNMATCHED_ROUTE);

        self.request_counter
            .with_label_values(&[method, route, &status_str])
            .inc();

        self.request_latency
            .with_label_values(&[method, route])
            .observe(latency.as_secs_f64());

        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a gate rejection
    pub fn record_rejection(&self, reason: &str) {
        self.rejection_counter.with_label_values(&[reason]).inc();
        self.total_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_rate_limit_partitions(&self, count: usize) {
        self.rate_limit_partitions
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Get the Prometheus metrics output
    pub fn prometheus_output(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }
}

fn method_label(method: &Method) -> &'static str {
    match method.as_str() {
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "PATCH" => "PATCH",
        "HEAD" => "HEAD",
        "OPTIONS" => "OPTIONS",
        _ => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = GatewayMetrics::new().unwrap();
        assert_eq!(metrics.total_requests(), 0);
        assert_eq!(metrics.total_rejections(), 0);
    }

    #[test]
    fn test_record_request() {
        let metrics = GatewayMetrics::new().unwrap();

        metrics.record_request(&Method::GET, Some("/health"), 200, Duration::from_millis(10));
        metrics.record_request(&Method::POST, None, 401, Duration::from_millis(1));
        assert_eq!(metrics.total_requests(), 2);

        let output = metrics.prometheus_output().unwrap();
        assert!(output.contains("route=\"<proxied>\""));
        assert!(output.contains("route=\"/health\""));
    }

    #[test]
    fn test_record_rejection() {
        let metrics = GatewayMetrics::new().unwrap();

        metrics.record_rejection("unauthorized");
        metrics.record_rejection("unauthorized");
        metrics.record_rejection("rate_limited");
        assert_eq!(metrics.total_rejections(), 3);

        let output = metrics.prometheus_output().unwrap();
        assert!(output.contains("gate_rejections_total{reason=\"unauthorized\"} 2"));
        assert!(output.contains("gate_rejections_total{reason=\"rate_limited\"} 1"));
    }

    #[test]
    fn test_method_label_is_bounded() {
        assert_eq!(method_label(&Method::GET), "GET");
        let custom = Method::from_bytes(b"BREW").unwrap();
        assert_eq!(method_label(&custom), "OTHER");
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_request(&Method::GET, Some("/positions"), 200, Duration::from_millis(10));
        metrics.set_rate_limit_partitions(3);

        let output = metrics.prometheus_output().unwrap();
        assert!(output.contains("gate_requests_total"));
        assert!(output.contains("gate_request_latency_seconds"));
        assert!(output.contains("gate_rate_limit_partitions 3"));
    }
}
