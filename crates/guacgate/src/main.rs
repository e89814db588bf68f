//! guacgate - WebSocket gateway for the Guacamole remote-desktop protocol
//!
//! This binary hosts the gateway:
//! - Accepts browser WebSocket connections carrying encrypted session tokens
//! - Negotiates the Guacamole handshake with guacd for each session
//! - Relays protocol instructions bidirectionally until disconnect

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use guacgate::config;
use guacgate::server::{router, GatewayState, Intake};

#[derive(Parser)]
#[command(name = "guacgate")]
#[command(version = "0.1.0")]
#[command(about = "WebSocket gateway for the Guacamole remote-desktop protocol")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Override listen address
    #[arg(long)]
    listen_address: Option<String>,

    /// Override listen port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Priority: --verbose flag, then RUST_LOG env var, then default "info"
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
    };
    tracing_subscriber::fmt().with_env_filter(&log_level).init();

    info!("Starting guacgate v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Apply CLI overrides
    if let Some(addr) = cli.listen_address {
        config.websocket.listen_address = addr;
    }
    if let Some(port) = cli.listen_port {
        config.websocket.listen_port = port;
    }

    let config = Arc::new(config);

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let intake = Intake::start(Arc::clone(&config), shutdown_tx.clone());
    let stats = intake.stats();

    let state = GatewayState {
        config: Arc::clone(&config),
        intake,
    };

    let addr = format!(
        "{}:{}",
        config.websocket.listen_address, config.websocket.listen_port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Gateway ready: listening on {} -> guacd {}:{} ({} workers)",
        addr, config.guacd.hostname, config.guacd.port, config.websocket.workers
    );

    let mut serve_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            let _ = serve_shutdown.recv().await;
        });
        if let Err(e) = serve.await {
            error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Send shutdown signal and give sessions a moment to unwind
    let _ = shutdown_tx.send(());
    tokio::time::sleep(Duration::from_secs(config.websocket.shutdown_grace_secs)).await;

    let _ = server_handle.await;

    info!(
        "Shutdown complete. Sessions accepted: {}, rejected: {}, still active: {}",
        stats.accepted.load(Ordering::Relaxed),
        stats.rejected.load(Ordering::Relaxed),
        stats.active.load(Ordering::Relaxed)
    );

    Ok(())
}
