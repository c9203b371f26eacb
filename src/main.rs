//! sandbox-portal: expose services running inside network-isolated sandboxes
//!
//! This is the main entry point for the sandbox-portal binary. It handles CLI
//! argument parsing, configuration loading, tracing initialization, and wires
//! the exposure registry, forwarder and API server together.
//!
//! # Logging
//!
//! - **Audit logging**: goes to syslog, one JSON object per control-plane change
//! - **Diagnostic logging**: goes to stderr through `tracing`

use anyhow::{Context, Result};
use clap::Parser;
use sandbox_portal::{
    api::{ApiServer, ApiState},
    cli::{Cli, Commands},
    config::{Config, ConfigLoader},
    expose::ExposureRegistry,
    forward::Forwarder,
    session::{InMemorySessionStore, SessionStore},
    telemetry::{AuditEvent, AuditLogger},
    tunnel::{DeviceDirectory, DialBridge},
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;
    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    match cli.command() {
        Commands::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(())
        }
        Commands::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(serve(config))
        }
    }
}

/// Run the service until Ctrl-C.
async fn serve(config: Config) -> Result<()> {
    let audit = Arc::new(AuditLogger::new().unwrap_or_else(|e| {
        warn!("Audit logging disabled: {}", e);
        AuditLogger::new_null()
    }));

    let devices = config.tunnel.devices()?;
    let dialer = Arc::new(DeviceDirectory::with_devices(devices));
    let bridge = DialBridge::new(dialer, config.tunnel.dial_timeout()?);

    let sessions: Arc<dyn SessionStore> =
        Arc::new(InMemorySessionStore::with_sessions(config.session_records()));
    let forwarder = Arc::new(Forwarder::new(sessions.clone(), bridge));
    let registry = Arc::new(ExposureRegistry::new(
        config.registry_settings()?,
        forwarder,
        audit.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = Arc::new(ApiState {
        sessions,
        registry: registry.clone(),
    });
    let listen = config.server.listen_addr()?;
    let server = ApiServer::bind(listen, state, shutdown_rx)
        .await
        .context("Failed to start API server")?;
    let listen = server.local_addr().unwrap_or(listen);

    audit.log(AuditEvent::ServiceStart {
        listen: listen.to_string(),
        pid: std::process::id(),
    });
    info!("sandbox-portal serving on {}", listen);

    let server_task = tokio::spawn(server.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("API server stopped with error: {}", e),
        Err(e) => warn!("API server task failed: {}", e),
    }

    let sessions_cleaned = registry.cleanup_all().await;
    audit.log(AuditEvent::ServiceStop { sessions_cleaned });
    info!("Stopped; cleaned up {} sessions", sessions_cleaned);

    Ok(())
}

/// Initialize the tracing subscriber for diagnostic logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, then `general.log_level`, then warnings only
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, configured: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let fallback = if configured.is_empty() {
        "warn"
    } else {
        configured
    };
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
