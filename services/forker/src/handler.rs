//! Serves forker requests arriving over the signal bus.

use std::sync::Arc;

use async_trait::async_trait;
use orbit_events::{names, IsolateDescriptor, Signal, SignalBus, SignalListener};
use orbit_id::SubscriptionId;
use serde_json::{json, Value};
use tracing::warn;

use crate::codes::StartResult;
use crate::forker::Forker;

/// Answers `FORKER_START`, `FORKER_STOP`, `FORKER_PING` and
/// `FORKER_PLATFORM_STOPPING` on behalf of a local [`Forker`].
pub struct ForkerSignalHandler {
    forker: Arc<dyn Forker>,
}

impl ForkerSignalHandler {
    pub fn new(forker: Arc<dyn Forker>) -> Self {
        Self { forker }
    }

    /// Registers a handler for every forker signal on `bus`.
    pub async fn register(forker: Arc<dyn Forker>, bus: &dyn SignalBus) -> SubscriptionId {
        let pattern = format!("{}*", names::FORKER_PREFIX);
        bus.register_listener(&pattern, Arc::new(Self::new(forker)))
            .await
    }
}

#[async_trait]
impl SignalListener for ForkerSignalHandler {
    async fn handle_signal(&self, signal: &Signal) -> Option<Value> {
        match signal.name.as_str() {
            names::FORKER_START => {
                let result = match signal.payload::<IsolateDescriptor>() {
                    Ok(descriptor) => self.forker.start_isolate(&descriptor).await,
                    Err(e) => {
                        warn!(sender = %signal.sender, error = %e, "Malformed start request");
                        StartResult::RequestError
                    }
                };
                Some(json!(result.code()))
            }
            names::FORKER_STOP => {
                match signal.payload::<String>() {
                    Ok(isolate) => self.forker.stop_isolate(&isolate).await,
                    Err(e) => warn!(sender = %signal.sender, error = %e, "Malformed stop request"),
                }
                None
            }
            names::FORKER_PING => match signal.payload::<String>() {
                Ok(isolate) => Some(json!(self.forker.ping(&isolate).await.code())),
                Err(e) => {
                    warn!(sender = %signal.sender, error = %e, "Malformed ping request");
                    None
                }
            },
            names::FORKER_PLATFORM_STOPPING => {
                self.forker.set_platform_stopping().await;
                None
            }
            _ => None,
        }
    }
}
