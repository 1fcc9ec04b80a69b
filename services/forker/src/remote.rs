//! A forker reached over the signal bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orbit_events::{names, ForkerRecord, IsolateDescriptor, SignalBus, SignalError};
use orbit_id::ForkerId;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::codes::{PingStatus, StartResult};
use crate::forker::Forker;

/// Forwards every [`Forker`] call to the isolate hosting a registered forker.
///
/// Communication failures surface as `REQUEST_*` start results. A ping that
/// cannot be delivered reports `NoWatcher`: nothing can vouch for the process.
pub struct RemoteForker {
    bus: Arc<dyn SignalBus>,
    record: ForkerRecord,
    timeout: Duration,
}

enum RequestFailure {
    Timeout,
    Error,
    NoResult,
}

impl RemoteForker {
    pub fn new(bus: Arc<dyn SignalBus>, record: ForkerRecord, timeout: Duration) -> Self {
        Self {
            bus,
            record,
            timeout,
        }
    }

    pub fn record(&self) -> &ForkerRecord {
        &self.record
    }

    async fn request(&self, name: &str, content: Value) -> Result<Value, RequestFailure> {
        let target = self.record.isolate.as_str();
        let sent = tokio::time::timeout(self.timeout, self.bus.fire(name, content, target)).await;

        let results = match sent {
            Err(_) | Ok(Err(SignalError::Timeout { .. })) => {
                warn!(signal = name, forker = target, "Forker request timed out");
                return Err(RequestFailure::Timeout);
            }
            Ok(Err(e)) => {
                warn!(signal = name, forker = target, error = %e, "Forker request failed");
                return Err(RequestFailure::Error);
            }
            Ok(Ok(results)) => results,
        };

        results.first_reply(target).cloned().ok_or_else(|| {
            warn!(signal = name, forker = target, "Forker sent no result");
            RequestFailure::NoResult
        })
    }

    async fn notify(&self, name: &str, content: Value) {
        let target = self.record.isolate.as_str();
        match tokio::time::timeout(self.timeout, self.bus.fire(name, content, target)).await {
            Ok(Ok(_)) => debug!(signal = name, forker = target, "Forker notified"),
            Ok(Err(e)) => warn!(signal = name, forker = target, error = %e, "Forker notification failed"),
            Err(_) => warn!(signal = name, forker = target, "Forker notification timed out"),
        }
    }
}

#[async_trait]
impl Forker for RemoteForker {
    async fn start_isolate(&self, descriptor: &IsolateDescriptor) -> StartResult {
        let content = match serde_json::to_value(descriptor) {
            Ok(content) => content,
            Err(e) => {
                warn!(isolate = %descriptor.name, error = %e, "Cannot encode start request");
                return StartResult::RequestError;
            }
        };

        match self.request(names::FORKER_START, content).await {
            Ok(reply) => reply
                .as_i64()
                .and_then(StartResult::from_code)
                .unwrap_or_else(|| {
                    warn!(isolate = %descriptor.name, reply = %reply, "Unrecognized start result");
                    StartResult::RequestError
                }),
            Err(RequestFailure::Timeout) => StartResult::RequestTimeout,
            Err(RequestFailure::Error) => StartResult::RequestError,
            Err(RequestFailure::NoResult) => StartResult::RequestNoResult,
        }
    }

    async fn stop_isolate(&self, isolate: &str) {
        self.notify(names::FORKER_STOP, json!(isolate)).await;
    }

    async fn ping(&self, isolate: &str) -> PingStatus {
        self.request(names::FORKER_PING, json!(isolate))
            .await
            .ok()
            .and_then(|reply| reply.as_i64())
            .and_then(PingStatus::from_code)
            .unwrap_or(PingStatus::NoWatcher)
    }

    fn is_on_node(&self, forker_id: &ForkerId, node: &str) -> bool {
        *forker_id == self.record.forker_id && node == self.record.node
    }

    async fn set_platform_stopping(&self) {
        self.notify(names::FORKER_PLATFORM_STOPPING, Value::Null)
            .await;
    }

    fn node_name(&self) -> &str {
        &self.record.node
    }
}
