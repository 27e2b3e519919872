//! HyperLiquid MCP Gate
//!
//! The HTTP front door of the HyperLiquid MCP server:
//! - API key authentication (`X-API-Key` header or `api_key` query parameter)
//! - Fixed-window rate limiting per credential or client address
//! - Liveness and readiness endpoints
//! - Prometheus metrics
//! - Forwarding of admitted requests to the upstream MCP server

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;

pub use app::{build_router, compose, AppState};
pub use config::GatewayConfig;
pub use error::GateError;
pub use gate::RequestGate;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
