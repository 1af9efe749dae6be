//! Spatial Relay: real-time player position relay
//!
//! Clients connect over WebSocket, announce a username and a position, and
//! receive every other player's joins, moves, and departures.
//!
//! Usage:
//!   spatial-relay                       # Port from $PORT, else 8080
//!   spatial-relay --port 9000           # Custom port
//!   spatial-relay --enforce-identity    # Reject moves for other players
//!   spatial-relay --log-file            # Also log to ./spatial-relay.log

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use relay_server::{RelayConfig, RelayEngine, SessionRegistry};
use relay_transport::{TransportConfig, TransportServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spatial-relay", about = "Spatial Relay: real-time player position relay")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    hostname: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "1024")]
    max_connections: usize,

    /// Do not send CORS headers
    #[arg(long)]
    no_cors: bool,

    /// Drop moves whose username is not the sender's own
    #[arg(long, env = "RELAY_ENFORCE_IDENTITY")]
    enforce_identity: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Write logs to a file (defaults to ./spatial-relay.log if no path given)
    #[arg(long, default_missing_value = "spatial-relay.log", num_args = 0..=1)]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) -> std::io::Result<()> {
    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match &cli.log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let builder = builder
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false);
            if cli.log_json {
                builder.json().init();
            } else {
                builder.init();
            }
            eprintln!("Logging to {}", path.display());
        }
        None if cli.log_json => builder.json().init(),
        None => builder.init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let registry = Arc::new(SessionRegistry::new());
    let engine = RelayEngine::with_config(
        registry,
        RelayConfig {
            enforce_identity: cli.enforce_identity,
        },
    );

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        enable_cors: !cli.no_cors,
        max_connections: Some(cli.max_connections),
        verbose_logging: cli.verbose,
    };

    let mut transport = match TransportServer::start(transport_config, engine).await {
        Ok(t) => t,
        Err(e) => {
            error!(code = %e.code(), "Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    info!("WebSocket server running on port {}", transport.port());
    println!();
    println!("  Spatial Relay");
    println!("    WebSocket:  ws://{}:{}/ws", cli.hostname, transport.port());
    println!("    Health:     http://{}:{}/health", cli.hostname, transport.port());
    println!(
        "    Identity:   {}",
        if cli.enforce_identity { "enforced" } else { "trusted as sent" }
    );
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    println!("  Shutting down...");
    transport.stop().await;
}
