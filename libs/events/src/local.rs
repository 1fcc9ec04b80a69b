//! In-process signal bus.
//!
//! Every isolate sharing a [`LocalSignalHub`] gets its own [`LocalSignalBus`]
//! handle. Used when a monitor, its forker and the isolates they manage run
//! in one process, and by the integration tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orbit_id::SubscriptionId;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::bus::{pattern_matches, SendResults, SignalBus, SignalListener};
use crate::envelope::{Signal, SignalGroup};
use crate::error::SignalError;

/// Role an endpoint plays, used to resolve `Monitors` and `Forkers` groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRole {
    Isolate,
    Monitor,
    Forker,
}

struct Registration {
    id: SubscriptionId,
    pattern: String,
    listener: Arc<dyn SignalListener>,
}

struct Endpoint {
    node: String,
    role: EndpointRole,
    listeners: Vec<Registration>,
}

/// Shared routing table of a local bus.
pub struct LocalSignalHub {
    endpoints: RwLock<HashMap<String, Endpoint>>,
    delivery_timeout: Duration,
}

impl LocalSignalHub {
    /// Creates a hub; every listener call is bounded by `delivery_timeout`.
    pub fn new(delivery_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            endpoints: RwLock::new(HashMap::new()),
            delivery_timeout,
        })
    }

    /// Connects an isolate and returns its bus handle.
    ///
    /// Reconnecting an isolate drops the listeners of the previous endpoint.
    pub async fn connect(
        self: &Arc<Self>,
        isolate: impl Into<String>,
        node: impl Into<String>,
        role: EndpointRole,
    ) -> LocalSignalBus {
        let isolate = isolate.into();
        let node = node.into();
        debug!(isolate = %isolate, node = %node, ?role, "Endpoint connected");

        self.endpoints.write().await.insert(
            isolate.clone(),
            Endpoint {
                node,
                role,
                listeners: Vec::new(),
            },
        );

        LocalSignalBus {
            hub: Arc::clone(self),
            isolate,
        }
    }

    /// Removes an isolate from the bus.
    pub async fn disconnect(&self, isolate: &str) -> bool {
        let removed = self.endpoints.write().await.remove(isolate).is_some();
        if removed {
            debug!(isolate = %isolate, "Endpoint disconnected");
        }
        removed
    }

    pub async fn is_connected(&self, isolate: &str) -> bool {
        self.endpoints.read().await.contains_key(isolate)
    }

    async fn group_targets(&self, sender: &str, group: SignalGroup) -> Vec<String> {
        let endpoints = self.endpoints.read().await;
        let sender_node = endpoints.get(sender).map(|e| e.node.clone());

        endpoints
            .iter()
            .filter(|(name, endpoint)| match group {
                SignalGroup::Current => name.as_str() == sender,
                SignalGroup::All => name.as_str() != sender,
                SignalGroup::Monitors => {
                    name.as_str() != sender && endpoint.role == EndpointRole::Monitor
                }
                SignalGroup::Forkers => {
                    name.as_str() != sender && endpoint.role == EndpointRole::Forker
                }
                SignalGroup::Local => {
                    name.as_str() != sender && Some(&endpoint.node) == sender_node.as_ref()
                }
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    async fn deliver(&self, signal: Signal, targets: Vec<String>) -> SendResults {
        let mut results = SendResults::default();
        let mut tasks = JoinSet::new();

        {
            let endpoints = self.endpoints.read().await;
            for target in targets {
                let Some(endpoint) = endpoints.get(&target) else {
                    results.failed.push(target);
                    continue;
                };

                let listeners: Vec<_> = endpoint
                    .listeners
                    .iter()
                    .filter(|r| pattern_matches(&r.pattern, &signal.name))
                    .map(|r| Arc::clone(&r.listener))
                    .collect();

                let signal = signal.clone();
                let timeout = self.delivery_timeout;
                tasks.spawn(async move {
                    let mut replies = Vec::new();
                    for listener in listeners {
                        match tokio::time::timeout(timeout, listener.handle_signal(&signal)).await {
                            Ok(Some(reply)) => replies.push(reply),
                            Ok(None) => {}
                            Err(_) => return (target, Err(())),
                        }
                    }
                    (target, Ok(replies))
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((target, Ok(replies))) => {
                    results.replies.insert(target, replies);
                }
                Ok((target, Err(()))) => {
                    warn!(signal = %signal.name, target = %target, "Signal delivery timed out");
                    results.failed.push(target);
                }
                Err(e) => {
                    warn!(signal = %signal.name, error = %e, "Signal listener panicked");
                }
            }
        }

        results
    }
}

/// Bus handle of one isolate connected to a [`LocalSignalHub`].
#[derive(Clone)]
pub struct LocalSignalBus {
    hub: Arc<LocalSignalHub>,
    isolate: String,
}

impl LocalSignalBus {
    pub fn hub(&self) -> &Arc<LocalSignalHub> {
        &self.hub
    }
}

fn check_name(name: &str) -> Result<(), SignalError> {
    if name.is_empty() || !name.starts_with('/') {
        return Err(SignalError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[async_trait]
impl SignalBus for LocalSignalBus {
    fn local_isolate(&self) -> &str {
        &self.isolate
    }

    async fn fire(
        &self,
        name: &str,
        content: serde_json::Value,
        target: &str,
    ) -> Result<SendResults, SignalError> {
        check_name(name)?;
        if !self.hub.is_connected(target).await {
            return Err(SignalError::UnknownTarget(target.to_string()));
        }

        let signal = Signal::new(name, self.isolate.clone(), content);
        let results = self.hub.deliver(signal, vec![target.to_string()]).await;
        if results.failed.iter().any(|t| t == target) {
            return Err(SignalError::Timeout {
                name: name.to_string(),
                target: target.to_string(),
            });
        }
        Ok(results)
    }

    async fn fire_group(
        &self,
        name: &str,
        content: serde_json::Value,
        group: SignalGroup,
    ) -> Result<SendResults, SignalError> {
        check_name(name)?;
        let targets = self.hub.group_targets(&self.isolate, group).await;
        debug!(signal = %name, group = %group, targets = targets.len(), "Firing group signal");

        let signal = Signal::new(name, self.isolate.clone(), content);
        Ok(self.hub.deliver(signal, targets).await)
    }

    async fn register_listener(
        &self,
        pattern: &str,
        listener: Arc<dyn SignalListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        let mut endpoints = self.hub.endpoints.write().await;
        match endpoints.get_mut(&self.isolate) {
            Some(endpoint) => endpoint.listeners.push(Registration {
                id,
                pattern: pattern.to_string(),
                listener,
            }),
            None => warn!(
                isolate = %self.isolate,
                pattern = %pattern,
                "Listener registered on a disconnected endpoint, ignoring"
            ),
        }
        id
    }

    async fn unregister_listener(&self, subscription: SubscriptionId) -> bool {
        let mut endpoints = self.hub.endpoints.write().await;
        let Some(endpoint) = endpoints.get_mut(&self.isolate) else {
            return false;
        };
        let before = endpoint.listeners.len();
        endpoint.listeners.retain(|r| r.id != subscription);
        endpoint.listeners.len() != before
    }
}
