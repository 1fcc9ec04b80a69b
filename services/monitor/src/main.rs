//! orbit monitor
//!
//! Runs the monitor coordinator together with the forker of its node.
//!
//! ## Architecture
//!
//! - **Forker**: a process forker served on its own bus endpoint
//! - **Coordinator**: reaches the forker through the bus, like a remote one
//! - **Exit watcher**: turns unexpected process exits into lost contact

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use orbit_events::{names, EndpointRole, LocalSignalHub, Signal, SignalBus, SignalListener};
use orbit_forker::{ExecRunner, ForkerSignalHandler, ProcessForker, RemoteForker};
use orbit_monitor::config::Config;
use orbit_monitor::{
    ForkerStopHandler, IsolateDirectory, MonitorCoordinator, MonitorError, MonitorSignalListener,
    PlatformFile,
};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Isolate kind launched with the configured runner program.
const NATIVE_KIND: &str = "native";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting orbit monitor");

    let config = Config::from_env()?;
    info!(
        node = %config.node_name,
        monitor = %config.monitor_isolate,
        forker = %config.forker_isolate,
        "Configuration loaded"
    );

    let directory = load_directory(&config)?;

    let hub = LocalSignalHub::new(config.request_timeout());
    let forker_bus = hub
        .connect(&config.forker_isolate, &config.node_name, EndpointRole::Forker)
        .await;
    let monitor_bus = Arc::new(
        hub.connect(&config.monitor_isolate, &config.node_name, EndpointRole::Monitor)
            .await,
    );

    // Node forker
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let forker = Arc::new(
        ProcessForker::new(&config.node_name, config.forker())
            .with_runner(ExecRunner::new(NATIVE_KIND, &config.runner_program))
            .with_exit_sender(exit_tx),
    );
    ForkerSignalHandler::register(forker.clone(), &forker_bus).await;
    let record = forker.record(&config.node_name, &config.forker_isolate);

    // Coordinator
    let remote = Arc::new(RemoteForker::new(
        monitor_bus.clone(),
        record.clone(),
        config.request_timeout(),
    ));
    let coordinator = Arc::new(
        MonitorCoordinator::new(config.monitor(), monitor_bus.clone(), remote, directory)
            .with_forker_stop_handler(Arc::new(LocalForkerStop {
                forker: forker.clone(),
            })),
    );
    MonitorSignalListener::register(coordinator.clone(), &*monitor_bus).await;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    monitor_bus
        .register_listener(
            names::ISOLATE_STOP,
            Arc::new(ShutdownOnStop { tx: shutdown_tx }),
        )
        .await;

    // Exit watcher
    let exits_handle = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move {
            while let Some(exit) = exit_rx.recv().await {
                if !exit.requested {
                    let coordinator = Arc::clone(&coordinator);
                    tokio::spawn(async move {
                        coordinator.handle_isolate_status(&exit.isolate, None).await;
                    });
                }
            }
        }
    });

    // Registering the local forker starts the isolates of this node.
    if let Some(starts) = coordinator.register_forker(record).await {
        match starts.await {
            Ok(outcomes) => {
                let started = outcomes.iter().filter(|(_, ok)| *ok).count();
                info!(started, total = outcomes.len(), "Node isolates started");
            }
            Err(e) => error!(error = %e, "Isolate start task failed"),
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            match coordinator.stop_platform().await {
                Ok(stop) => match stop.await {
                    Ok(report) => info!(graceful = report.graceful, forced = ?report.forced, "Platform stop complete"),
                    Err(e) => error!(error = %e, "Platform stop task failed"),
                },
                Err(e) => warn!(error = %e, "Platform stop refused"),
            }
        }
        _ = shutdown_rx.changed() => {
            info!("Monitor isolate stop requested");
        }
    }

    exits_handle.abort();
    info!("Monitor shutdown complete");
    Ok(())
}

/// Plans the managed isolates from the platform file.
fn load_directory(config: &Config) -> Result<IsolateDirectory> {
    let Some(path) = &config.platform_file else {
        return Ok(IsolateDirectory::new());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let platform = PlatformFile::from_json(&raw)
        .with_context(|| format!("malformed platform file {}", path.display()))?;

    let directory = match platform.plan(&config.node_name) {
        Ok(directory) => directory,
        Err(MonitorError::Placement(failure)) => {
            for component in &failure.unresolved {
                warn!(
                    set = %failure.set,
                    component = %component.name,
                    kind = %component.kind,
                    pinned = ?component.pinned,
                    "Component cannot be placed"
                );
            }
            return Err(MonitorError::Placement(failure)).context("placement failed");
        }
        Err(e) => return Err(e).context("failed to plan platform"),
    };

    info!(isolates = directory.len(), "Platform loaded");
    Ok(directory)
}

struct LocalForkerStop {
    forker: Arc<ProcessForker>,
}

#[async_trait]
impl ForkerStopHandler for LocalForkerStop {
    async fn stop_forker(&self) {
        self.forker.stop_all().await;
        info!("Node forker stopped");
    }
}

struct ShutdownOnStop {
    tx: watch::Sender<bool>,
}

#[async_trait]
impl SignalListener for ShutdownOnStop {
    async fn handle_signal(&self, signal: &Signal) -> Option<serde_json::Value> {
        info!(sender = %signal.sender, "Stop signal received");
        let _ = self.tx.send(true);
        None
    }
}
