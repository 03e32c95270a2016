//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → [load balancer queues the request on an instance]
//!     → forward.rs (instance worker relays it to the backend)
//!     → backend response streamed back to the client
//! ```

pub mod forward;
pub mod server;

pub use forward::Forwarder;
pub use server::HttpServer;

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";
