//! HyperLiquid MCP Gate - CLI Application

use clap::{Parser, Subcommand};
use hyperliquid_mcp_gate::{build_router, gate::spawn_pruner, AppState, GatewayConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// HyperLiquid MCP Gate - authenticating front door for the MCP server
#[derive(Parser)]
#[command(name = "hyperliquid-mcp-gate")]
#[command(version, about = "Authenticating, rate-limiting front door for the HyperLiquid MCP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gate server
    Start {
        /// Optional configuration file; environment variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate the effective configuration
    Validate {
        /// Optional configuration file; environment variables override it
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Generate a sample configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config } => start_server(config).await?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Init { output } => generate_sample_config(&output)?,
    }

    Ok(())
}

/// Start the gate server
async fn start_server(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::load(config_path.as_deref())?;
    match &config_path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("Loaded configuration from environment"),
    }

    if config.auth.require_auth {
        info!("API authentication is ENABLED");
    } else {
        warn!("API authentication is DISABLED (not recommended for production)");
    }
    info!("Rate limit: {}", config.rate_limit.describe());
    match &config.upstream.url {
        Some(url) => info!("Forwarding admitted requests to {}", url),
        None => info!("No upstream configured; unmatched paths return 404"),
    }

    let addr: SocketAddr = config.server_addr().parse()?;
    let state = AppState::from_config(config)?;
    let health = state.health.clone();

    if let Some(limiter) = &state.limiter {
        spawn_pruner(limiter.clone(), state.metrics.clone());
    }

    let app = build_router(state);

    info!("Starting gate server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining connections");
        health.set_ready(false);
    })
    .await?;

    info!("Gate server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Validate the effective configuration
fn validate_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    match GatewayConfig::load(config_path.as_deref()) {
        Ok(config) => {
            println!("✓ Configuration is valid!");
            println!();
            println!("Server: {}", config.server_addr());
            println!(
                "Authentication: {}",
                if config.auth.require_auth {
                    "required"
                } else {
                    "disabled"
                }
            );
            println!("API key configured: {}", !config.auth.api_key.is_empty());
            println!("Rate limit: {}", config.rate_limit.describe());
            println!("Trusted proxies: {}", config.server.trusted_proxies);
            println!(
                "Health: {} ({})",
                config.health.path,
                if config.health.public { "public" } else { "gated" }
            );
            println!(
                "Upstream: {}",
                config.upstream.url.as_deref().unwrap_or("none")
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}

/// Generate sample configuration file
fn generate_sample_config(output_path: &std::path::Path) -> anyhow::Result<()> {
    let sample_config = r#"# HyperLiquid MCP Gate Configuration
# Environment variables (API_KEY, REQUIRE_AUTH, RATE_LIMIT, RATE_LIMIT_WINDOW_SECS,
# HOST, PORT, TRUSTED_PROXIES, UPSTREAM_URL, HEALTH_PUBLIC, SERVICE_NAME) override these values.

[server]
host = "0.0.0.0"
port = 8080
timeout = 30
cors = false
# Reverse proxies that append to X-Forwarded-For (Railway, Render: 1).
# 0 identifies clients by socket address.
trusted_proxies = 0

[auth]
require_auth = true
# Prefer setting API_KEY in the environment instead of here
api_key = ""
header_name = "X-API-Key"
allow_query_param = true
query_param_name = "api_key"

[rate_limit]
limit = 60        # requests per window, 0 disables
window_secs = 60

[health]
enabled = true
path = "/health"
ready_path = "/ready"
public = true
service_name = "hyperliquid-mcp"

[metrics]
enabled = true
path = "/metrics"

[upstream]
url = "http://127.0.0.1:8000"
"#;

    std::fs::write(output_path, sample_config)?;
    println!("Sample configuration written to {}", output_path.display());
    Ok(())
}
