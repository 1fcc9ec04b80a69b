//! orbit isolate
//!
//! Hosts the modules of one isolate. Launched by the node's forker, which
//! passes the isolate identity through `ORBIT_*` environment variables.
//!
//! The signal bus is in-process only: this binary's endpoint shares no hub
//! with the monitor, so its status reports reach no monitor and it never
//! receives `isolate-stop`. A platform stop therefore ends it through the
//! forker's SIGTERM, handled below like Ctrl-C, which runs the same stop
//! sequence as the signal would.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use orbit_events::{EndpointRole, IsolateDescriptor, LocalSignalHub, ModuleRef};
use orbit_isolate::config::Config;
use orbit_isolate::{BrokerClient, HostConfig, IsolateHost, MockModuleRuntime};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    info!(
        isolate_uid = %config.isolate_uid,
        isolate = %config.isolate_name,
        node = %config.node_name,
        "Configuration loaded"
    );

    let modules = match &config.broker_url {
        Some(url) => load_modules(url, &config).await?,
        None => Vec::new(),
    };

    let hub = LocalSignalHub::new(Duration::from_secs(5));
    let bus = hub
        .connect(&config.isolate_name, &config.node_name, EndpointRole::Isolate)
        .await;

    // Module container (mock for now)
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let runtime = Arc::new(MockModuleRuntime::new().with_events(events_tx));

    let host = IsolateHost::start(
        Arc::new(bus),
        runtime,
        events_rx,
        HostConfig {
            modules,
            agent: config.agent(),
            guardian: config.guardian(),
            ..Default::default()
        },
    )
    .await;

    let mut shutdown = host.shutdown_signal();
    tokio::select! {
        _ = termination() => {
            info!("Received shutdown signal");
            host.stop().await;
        }
        _ = shutdown.changed() => {}
    }

    info!("Isolate shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM from the forker.
async fn termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Fetches this isolate's descriptor from the broker, then discards it there.
async fn load_modules(url: &str, config: &Config) -> Result<Vec<ModuleRef>> {
    let broker = BrokerClient::new(url).context("invalid ORBIT_BROKER_URL")?;
    let key = config.isolate_uid.to_string();

    let document = broker
        .fetch_configuration(&key)
        .await
        .context("failed to fetch isolate configuration")?;
    let descriptor: IsolateDescriptor =
        serde_json::from_value(document).context("malformed isolate configuration")?;

    if let Err(e) = broker.delete_configuration(&key).await {
        warn!(error = %e, "Failed to discard configuration on the broker");
    }

    info!(modules = descriptor.modules.len(), "Isolate configuration loaded");
    Ok(descriptor.modules)
}
