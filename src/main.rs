//! API Gateway
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────────┐
//!                        │                   API GATEWAY                     │
//!                        │                                                   │
//!     Client Request     │  ┌────────┐   ┌─────────┐   ┌────────────────┐   │
//!     ───────────────────┼─▶│  http  │──▶│ routing │──▶│ rate limiting  │   │
//!                        │  │ server │   │ (first  │   │ global/ip/user │   │
//!                        │  └────────┘   │  match) │   └───────┬────────┘   │
//!                        │               └─────────┘           │            │
//!                        │                                     ▼            │
//!     Client Response    │  ┌────────┐   ┌─────────┐   ┌────────────────┐   │
//!     ◀──────────────────┼──│outcome │◀──│ forward │◀──│circuit breaker │   │
//!                        │  └────────┘   └────┬────┘   └────────────────┘   │
//!                        │                    │                              │
//!                        │  ┌─────────────────▼───────────────────────────┐ │
//!                        │  │ registry ◀── active health checks (loop)    │ │
//!                        │  └─────────────────────────────────────────────┘ │
//!                        └──────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, watcher::ConfigWatcher, ConfigError};
use api_gateway::lifecycle::{signals::spawn_signal_handler, Shutdown};
use api_gateway::observability::{logging::init_logging, metrics::init_metrics};
use api_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "api-gateway")]
#[command(about = "API gateway with health checking, rate limiting and circuit breaking", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    /// Do not reload the configuration when the file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");
    tracing::info!(
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let (watcher, config_updates) = ConfigWatcher::new(&args.config);
    let _watcher = if args.no_watch {
        None
    } else {
        match watcher.run() {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                tracing::warn!(error = %e, "Config hot reload disabled");
                None
            }
        }
    };

    let server = HttpServer::new(config).map_err(ConfigError::Validation)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
