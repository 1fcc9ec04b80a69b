//! The signal bus contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orbit_id::SubscriptionId;

use crate::envelope::{Signal, SignalGroup};
use crate::error::SignalError;

/// Receives signals whose name matches the pattern it was registered with.
///
/// The returned value, if any, is sent back to the sender as the reply of
/// this isolate.
#[async_trait]
pub trait SignalListener: Send + Sync {
    async fn handle_signal(&self, signal: &Signal) -> Option<serde_json::Value>;
}

/// Outcome of a fire call.
#[derive(Debug, Clone, Default)]
pub struct SendResults {
    /// Replies by isolate name.
    pub replies: HashMap<String, Vec<serde_json::Value>>,

    /// Targets that could not be reached or timed out.
    pub failed: Vec<String>,
}

impl SendResults {
    /// First reply received from `isolate`.
    pub fn first_reply(&self, isolate: &str) -> Option<&serde_json::Value> {
        self.replies.get(isolate).and_then(|r| r.first())
    }

    /// Number of isolates the signal reached.
    pub fn reached(&self) -> usize {
        self.replies.len()
    }
}

/// Addressed pub/sub between isolates.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Name of the isolate this bus handle sends from.
    fn local_isolate(&self) -> &str;

    /// Sends a signal to a single isolate.
    async fn fire(
        &self,
        name: &str,
        content: serde_json::Value,
        target: &str,
    ) -> Result<SendResults, SignalError>;

    /// Sends a signal to a group of isolates.
    async fn fire_group(
        &self,
        name: &str,
        content: serde_json::Value,
        group: SignalGroup,
    ) -> Result<SendResults, SignalError>;

    /// Registers a listener for every signal matching `pattern`.
    async fn register_listener(
        &self,
        pattern: &str,
        listener: Arc<dyn SignalListener>,
    ) -> SubscriptionId;

    /// Removes a listener. Returns false if it was not registered.
    async fn unregister_listener(&self, subscription: SubscriptionId) -> bool;
}

/// Matches a signal name against a listener pattern.
///
/// Patterns are exact names, or a prefix followed by `*`.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => pattern == name,
    }
}
