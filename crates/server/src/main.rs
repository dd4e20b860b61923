//! Presence server binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use presence_server::{DEFAULT_BIND_ADDR, KEEPALIVE_INTERVAL_SECS, PEER_QUEUE_CAPACITY, ServerConfig, net};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "presence-server", about = "Real-time presence sync server")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = DEFAULT_BIND_ADDR)]
    bind: SocketAddr,

    /// Per-peer outbox capacity before a slow session is dropped.
    #[arg(long, default_value_t = PEER_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Keepalive ping interval in seconds.
    #[arg(long, default_value_t = KEEPALIVE_INTERVAL_SECS)]
    keepalive_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        peer_queue_capacity: args.queue_capacity,
        keepalive_interval: Duration::from_secs(args.keepalive_secs),
    };

    let shared = Arc::new(net::Shared::new(config));
    let app = net::router(shared);

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(addr = %args.bind, "presence server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    Ok(())
}
