//! failover-proxy
//!
//! A reverse-proxy load balancer that queues every request on a backend
//! instance and reroutes queued work when that backend stops answering.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌───────────────────────────────────────────────────────┐
//!                     │                    LOAD BALANCER                       │
//!                     │                                                        │
//!  Client Request     │  ┌─────────┐   ┌────────────┐   ┌──────────────────┐  │
//!  ───────────────────┼─▶│  http   │──▶│ dispatcher │──▶│ instance queue   │  │
//!                     │  │ server  │   │ + strategy │   │ (bounded, FIFO)  │  │
//!                     │  └─────────┘   └────────────┘   └────────┬─────────┘  │
//!                     │       ▲              ▲                    ▼            │
//!                     │       │              │           ┌──────────────────┐  │
//!  Client Response    │       │              │           │ instance worker  │──┼──▶ Backend
//!  ◀──────────────────┼───────┘              │           │ probe + forward  │  │
//!                     │                      │           └────────┬─────────┘  │
//!                     │               ┌──────┴──────┐   probe fails│           │
//!                     │               │  emergency  │◀─────────────┘           │
//!                     │               │   requeue   │  in-flight + backlog     │
//!                     │               └─────────────┘                          │
//!                     └───────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use failover_proxy::config::loader::{finalize, load_backend_list, load_config};
use failover_proxy::config::BalancerConfig;
use failover_proxy::lifecycle::startup;
use failover_proxy::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "failover-proxy")]
#[command(about = "Round-robin HTTP load balancer with backlog rerouting", long_about = None)]
struct Cli {
    /// Port for the load balancer
    #[arg(short, long)]
    port: Option<u16>,

    /// Name of the service
    #[arg(short, long)]
    name: Option<String>,

    /// Backend selection strategy
    #[arg(short, long)]
    strategy: Option<String>,

    /// File containing the URLs of your servers, one per line
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<BalancerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => BalancerConfig::default(),
        };

        if let Some(port) = self.port {
            config.service.port = port;
        }
        if let Some(name) = self.name {
            config.service.name = name;
        }
        if let Some(strategy) = self.strategy {
            config.service.strategy = strategy;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(file) = &self.file {
            config.backends = load_backend_list(file)?;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    init_logging(&config.observability.log_level);

    let config = match finalize(config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    tracing::info!(
        service = %config.service.name,
        bind_address = %config.service.bind_address(),
        strategy = %config.service.strategy,
        backends = config.backends.len(),
        "Configuration loaded"
    );
    for backend in &config.backends {
        tracing::debug!(backend = %backend, "Configured backend");
    }

    if let Err(e) = startup::run(config).await {
        tracing::error!(error = %e, "Load balancer stopped");
        return Err(e.into());
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
