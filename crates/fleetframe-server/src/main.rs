//! Fleetframe server binary.
//!
//! # Usage
//!
//! ```bash
//! # Development: self-signed certificate, secret from the environment
//! FLEETFRAME_JWT_SECRET=dev-secret fleetframe-server --bind 0.0.0.0:4433
//!
//! # Production: TLS certificate from a trusted CA
//! fleetframe-server --bind 0.0.0.0:4433 --cert cert.pem --key key.pem
//! ```

use clap::Parser;
use fleetframe_core::CoreConfig;
use fleetframe_server::{Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Fleetframe real-time tracking server
#[derive(Parser, Debug)]
#[command(name = "fleetframe-server")]
#[command(about = "Fleetframe courier tracking and dispatch server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long)]
    cert: Option<String>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long)]
    key: Option<String>,

    /// Shared HS256 secret for connection credentials
    /// (falls back to FLEETFRAME_JWT_SECRET)
    #[arg(long, env = "FLEETFRAME_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("fleetframe server starting");
    tracing::info!("binding to {}", args.bind);

    if args.cert.is_none() || args.key.is_none() {
        tracing::warn!("no TLS certificate provided - using a self-signed certificate");
        tracing::warn!("this is NOT suitable for production use");
    }

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        cert_path: args.cert,
        key_path: args.key,
        jwt_secret: args.jwt_secret,
        core: CoreConfig { max_connections: args.max_connections, ..CoreConfig::default() },
    };

    let server = Server::bind(config)?;

    tracing::info!("server listening on {}", server.local_addr()?);

    server.run().await?;

    Ok(())
}
