//! Health check module
//!
//! - Liveness: static "ok" while the process can serve HTTP
//! - Readiness: flips to unavailable when the process starts draining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Liveness payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub auth_required: bool,
    pub rate_limit: String,
}

/// Readiness status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessStatus {
    Ready,
    Unavailable,
}

/// Readiness payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: ReadinessStatus,
    pub service: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health checker service
#[derive(Debug, Clone)]
pub struct HealthChecker {
    start_time: Instant,
    started_at: DateTime<Utc>,
    ready: Arc<AtomicBool>,
    service: String,
    version: String,
    auth_required: bool,
    rate_limit: String,
}

impl HealthChecker {
    /// Create a new health checker. `rate_limit` is the human readable quota.
    pub fn new(service: impl Into<String>, auth_required: bool, rate_limit: impl Into<String>) -> Self {
        Self {
            start_time: Instant::now(),
            started_at: Utc::now(),
            ready: Arc::new(AtomicBool::new(true)),
            service: service.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            auth_required,
            rate_limit: rate_limit.into(),
        }
    }

    /// Liveness is always "ok" while the process is serving
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            service: self.service.clone(),
            version: self.version.clone(),
            uptime_seconds: self.uptime_seconds(),
            auth_required: self.auth_required,
            rate_limit: self.rate_limit.clone(),
        }
    }

    pub fn readiness(&self) -> ReadinessResponse {
        let is_ready = self.is_ready();

        ReadinessResponse {
            status: if is_ready {
                ReadinessStatus::Ready
            } else {
                ReadinessStatus::Unavailable
            },
            service: self.service.clone(),
            started_at: self.started_at,
            message: if is_ready {
                None
            } else {
                Some("Service is shutting down".to_string())
            },
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
