//! TTN Bridge - The Things Network uplink to MQTT republisher
//!
//! Usage:
//!   ttnbridge [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path (default: ./config.json)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ttnbridge::bridge::{Bridge, BridgeError};
use ttnbridge::config::{BridgeConfig, DEFAULT_CONFIG_PATH};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// TTN Bridge - republish TTN uplinks to an MQTT broker
#[derive(Parser, Debug)]
#[command(name = "ttnbridge")]
#[command(author = "TTN Bridge Contributors")]
#[command(version)]
#[command(about = "Republish The Things Network uplinks to an MQTT broker")]
struct Args {
    /// Configuration file path (JSON format)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Register the SIGINT and SIGTERM handlers. The returned future resolves
/// on the first of either; signals arriving before it is polled are kept.
#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match BridgeConfig::load(&args.config).map_err(BridgeError::from) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config file {:?}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides RUST_LOG, RUST_LOG overrides config
    let filter = match args.log_level {
        Some(level) => EnvFilter::new(level.to_tracing_level().as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                LogLevel::from_config(&config.log.level)
                    .to_tracing_level()
                    .as_str(),
            )
        }),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Loaded configuration from {:?}", args.config);
    info!("Starting TTN Bridge");
    info!(
        "  Upstream: {} (client_id={}, topic={})",
        config.ttn.broker_url(),
        config.ttn.client_id,
        config.ttn.topic
    );
    info!(
        "  Downstream: {} (client_id={}, qos={}, retain={})",
        config.broker.broker_url(),
        config.broker.client_id,
        config.broker.qos,
        config.broker.retain()
    );
    info!(
        "  Topic: {}/<app>_<device>/{}",
        config.broker.topic_prefix, config.broker.topic_suffix
    );
    tracing::debug!("Configuration: {:?}", config);

    let shutdown = shutdown_signal()?;
    let bridge = Bridge::new(Arc::new(config));

    match bridge.start(shutdown).await {
        Ok(stats) => {
            info!(
                "Shutdown complete ({} received, {} published, {} failed, {} dropped)",
                stats.received, stats.published, stats.failed, stats.dropped
            );
            Ok(())
        }
        Err(e) => {
            error!("Bridge failed: {}", e);
            std::process::exit(1);
        }
    }
}
