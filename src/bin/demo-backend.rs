//! A tiny backend for trying the balancer by hand.
//!
//! Run a few of these on different ports, list them in a backends file and
//! stop one while requests are flowing.

use axum::{extract::State, http::Uri, routing::any, Router};
use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "demo-backend")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Name echoed in every response
    #[arg(short, long, default_value = "server-A")]
    name: String,
}

async fn hello(State(name): State<String>, uri: Uri) -> String {
    tracing::info!(server = %name, path = %uri.path(), "Serving request");
    format!("hello world from {}\n", name)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let app = Router::new()
        .route("/", any(hello))
        .route("/{*path}", any(hello))
        .with_state(args.name.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(server = %args.name, address = %addr, "Demo backend listening");

    axum::serve(listener, app).await?;
    Ok(())
}
