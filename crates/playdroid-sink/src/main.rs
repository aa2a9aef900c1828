//! Playdroid Sink - stand-in display server for bridge bring-up
//!
//! Listens on the display socket, answers each bridge's resolution request
//! with the configured geometry and logs every buffer handed to it. No
//! pixels are ever read.

mod args;
mod fps;
mod server;

use anyhow::Result;
use args::SinkArgs;
use server::SinkServer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "playdroid_sink=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = SinkArgs::parse(std::env::args().skip(1))?;
    info!(
        "Starting Playdroid sink: {}x{} @ {}mHz",
        args.width, args.height, args.refresh_mhz
    );

    let server = SinkServer::bind(&args)?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    let _ = std::fs::remove_file(&args.socket_path);
    Ok(())
}
