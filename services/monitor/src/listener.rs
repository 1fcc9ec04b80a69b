//! Routes monitor signals into the coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use orbit_events::{names, IsolateStatusEvent, Signal, SignalBus, SignalListener};
use orbit_id::SubscriptionId;
use serde_json::Value;
use tracing::{info, warn};

use crate::coordinator::MonitorCoordinator;

pub struct MonitorSignalListener {
    coordinator: Arc<MonitorCoordinator>,
}

impl MonitorSignalListener {
    pub fn new(coordinator: Arc<MonitorCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Listens for isolate-status, isolate-lost and monitor-stop-platform.
    pub async fn register(
        coordinator: Arc<MonitorCoordinator>,
        bus: &dyn SignalBus,
    ) -> Vec<SubscriptionId> {
        let listener = Arc::new(Self::new(coordinator));
        let mut subscriptions = Vec::new();
        for name in [
            names::ISOLATE_STATUS,
            names::ISOLATE_LOST,
            names::MONITOR_STOP_PLATFORM,
        ] {
            subscriptions.push(bus.register_listener(name, listener.clone()).await);
        }
        subscriptions
    }
}

#[async_trait]
impl SignalListener for MonitorSignalListener {
    async fn handle_signal(&self, signal: &Signal) -> Option<Value> {
        match signal.name.as_str() {
            names::ISOLATE_STATUS => match signal.payload::<IsolateStatusEvent>() {
                Ok(event) => {
                    // A failure report may wait out a restart; stamps
                    // absorb any reordering between spawned handlers.
                    let coordinator = Arc::clone(&self.coordinator);
                    let sender = signal.sender.clone();
                    tokio::spawn(async move {
                        coordinator.handle_isolate_status(&sender, Some(event)).await;
                    });
                }
                Err(e) => warn!(sender = %signal.sender, error = %e, "Malformed isolate status"),
            },
            names::ISOLATE_LOST => match signal.payload::<String>() {
                Ok(isolate) => self.coordinator.note_isolate_lost(&isolate).await,
                Err(e) => warn!(sender = %signal.sender, error = %e, "Malformed isolate-lost signal"),
            },
            names::MONITOR_STOP_PLATFORM => {
                info!(sender = %signal.sender, "Peer monitor stopping the platform");
                let coordinator = Arc::clone(&self.coordinator);
                tokio::spawn(async move {
                    if let Err(e) = coordinator.stop_platform().await {
                        warn!(error = %e, "Ignoring peer stop request");
                    }
                });
            }
            _ => {}
        }
        None
    }
}
