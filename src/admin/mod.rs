//! Operator admin API.
//!
//! Disabled by default. Every route requires `Authorization: Bearer <api_key>`.
//! Adding an instance is the only way out of Recovery mode.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::load_balancer::LoadBalancer;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub balancer: Arc<LoadBalancer>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/instances", get(get_instances).post(add_instance))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

/// Serve the admin API until shutdown.
pub async fn serve_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
