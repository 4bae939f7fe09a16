//! Tally attendance server
//!
//! Single-host binary: the protocol engine wired onto the in-process bus,
//! with an optional embedded terminal fed from stdin. The config file path
//! is the first argument (`tally.toml` by default).

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_core::{AdmissionList, AttendanceStore};
use tally_net::{Bus, LoopbackBus, PresenceTracker, Router, TerminalAgent};

mod config;
mod reader;

use config::ServerConfig;
use reader::StdinReader;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tally.toml"));

    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load {}: {error}", config_path.display());
            std::process::exit(1);
        }
    };

    let _log_guard = match init_logging(&config) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("failed to initialize logging: {error}");
            std::process::exit(1);
        }
    };

    tracing::info!(server_id = %config.server_id, "starting tally server");

    if let Err(error) = run(config).await {
        tracing::error!(%error, "fatal error");
        std::process::exit(1);
    }
}

/// Console layer plus a per-session log file under the configured log dir
fn init_logging(
    config: &ServerConfig,
) -> std::io::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&config.paths.log_dir)?;

    let session_log = tracing_appender::rolling::never(
        &config.paths.log_dir,
        format!("{}.log", chrono::Local::now().format("%d-%m-%Y-%H-%M-%S")),
    );
    let (file_writer, guard) = tracing_appender::non_blocking(session_log);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    Ok(guard)
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bus: Arc<dyn Bus> = Arc::new(LoopbackBus::new());

    let store = AttendanceStore::open(&config.paths.data_dir, &config.paths.report_dir)?;
    let store = Arc::new(Mutex::new(store));
    let admissions = Arc::new(RwLock::new(AdmissionList::open(&config.paths.whitelist)?));

    let mut tracker = PresenceTracker::new(config.server_id.clone(), config.broadcast_interval());
    let mut router = Router::new(
        config.server_id.clone(),
        bus.clone(),
        store.clone(),
        admissions.clone(),
        tracker.handle(),
    );

    router.connect().await?;
    for terminal_id in &config.admit {
        // Already-admitted terminals are reported by the list itself
        router.add_terminal(terminal_id).await?;
    }
    tracker.start(bus.clone());

    let mut agent = if config.terminal.enabled {
        let mut agent = TerminalAgent::new(
            config.terminal.terminal_id.clone(),
            bus.clone(),
            config.scan_interval(),
        );
        agent.connect(Box::new(StdinReader::spawn()))?;
        tracing::info!(
            terminal_id = %config.terminal.terminal_id,
            "embedded terminal started, type badge ids on stdin"
        );
        Some(agent)
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    if let Some(agent) = agent.as_mut() {
        agent.disconnect().await;
    }
    tracker.stop().await;
    router.disconnect().await;

    Ok(())
}
