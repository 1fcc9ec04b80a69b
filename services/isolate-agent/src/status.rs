//! Isolate status reporting.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orbit_events::{names, IsolateState, IsolateStatusEvent, SignalBus, SignalError, SignalGroup};
use tracing::{debug, warn};

/// Sends this isolate's [`IsolateStatusEvent`]s to the monitors.
///
/// Stamps start at the wall clock in milliseconds and strictly increase,
/// so a respawned isolate never reuses a stamp its predecessor sent.
pub struct StatusReporter {
    bus: Arc<dyn SignalBus>,
    isolate: String,
    last_stamp: AtomicI64,
    timeout: Duration,
}

impl StatusReporter {
    pub fn new(bus: Arc<dyn SignalBus>, timeout: Duration) -> Self {
        let isolate = bus.local_isolate().to_string();
        Self {
            bus,
            isolate,
            last_stamp: AtomicI64::new(0),
            timeout,
        }
    }

    pub fn isolate(&self) -> &str {
        &self.isolate
    }

    /// Next stamp: one past the previous, or the current time if later.
    pub fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    pub async fn report(&self, event: IsolateStatusEvent) -> Result<(), SignalError> {
        let content = serde_json::to_value(&event)?;
        let sent = tokio::time::timeout(
            self.timeout,
            self.bus
                .fire_group(names::ISOLATE_STATUS, content, SignalGroup::Monitors),
        )
        .await;

        match sent {
            Ok(Ok(results)) => {
                debug!(
                    isolate_id = %self.isolate,
                    stamp = event.stamp,
                    state = %event.state,
                    monitors = results.reached(),
                    "Status reported"
                );
                if !results.failed.is_empty() {
                    warn!(
                        isolate_id = %self.isolate,
                        failed = ?results.failed,
                        "Some monitors did not take the status report"
                    );
                }
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SignalError::Timeout {
                name: names::ISOLATE_STATUS.to_string(),
                target: SignalGroup::Monitors.to_string(),
            }),
        }
    }

    pub fn event(&self, state: IsolateState) -> IsolateStatusEvent {
        IsolateStatusEvent::new(self.isolate.clone(), self.next_stamp(), state)
    }

    pub async fn alive(&self, progress: f64) -> Result<(), SignalError> {
        self.report(self.event(IsolateState::Alive).with_progress(progress))
            .await
    }

    pub async fn failure(&self, detail: impl Into<String>) -> Result<(), SignalError> {
        self.report(self.event(IsolateState::Failure).with_detail(detail))
            .await
    }

    pub async fn stopping(&self) -> Result<(), SignalError> {
        self.report(self.event(IsolateState::RuntimeStopping)).await
    }

    pub async fn stopped(&self) -> Result<(), SignalError> {
        self.report(self.event(IsolateState::RuntimeStopped)).await
    }
}
