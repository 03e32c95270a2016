//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the balancer from a validated configuration
//! - Run the startup health sweep before any traffic is accepted
//! - Start instance workers, the requeue worker and the listeners
//! - Turn fatal background errors into a failed run

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::{serve_admin, AdminState};
use crate::config::BalancerConfig;
use crate::error::BalancerError;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics;

/// Why the balancer stopped abnormally.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid address '{0}'")]
    Address(String),
}

/// Bind the configured listeners and run until a shutdown signal.
pub async fn run(config: BalancerConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::Address(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let listener = TcpListener::bind(config.service.bind_address()).await?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        trigger.trigger();
    });

    serve(config, listener, &shutdown).await
}

/// Run the balancer behind an already bound listener.
pub async fn serve(
    config: BalancerConfig,
    listener: TcpListener,
    shutdown: &Shutdown,
) -> Result<(), StartupError> {
    let balancer = LoadBalancer::new(&config)?;

    let live = balancer.initial_sweep().await?;
    tracing::info!(
        service = %balancer.name(),
        live,
        configured = config.backends.len(),
        "Startup health sweep complete"
    );

    let mut fatal = balancer.start()?;

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            balancer: Arc::clone(&balancer),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = serve_admin(admin_listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    tracing::info!(service = %balancer.name(), address = %listener.local_addr()?, "Load balancer running");
    let server = HttpServer::new(balancer);

    tokio::select! {
        result = server.run(listener, shutdown.subscribe()) => {
            result?;
            Ok(())
        }
        Some(error) = fatal.recv() => {
            tracing::error!(error = %error, "Stopping on fatal error");
            shutdown.trigger();
            Err(error.into())
        }
    }
}
