//! The forker contract.

use async_trait::async_trait;
use orbit_events::IsolateDescriptor;
use orbit_id::ForkerId;

use crate::codes::{PingStatus, StartResult};

/// Starts, stops and probes isolate processes on one node.
///
/// Isolates are identified by name. Implementations never let a launch
/// error escape: every failure maps to a [`StartResult`] code.
#[async_trait]
pub trait Forker: Send + Sync {
    /// Launches the isolate. Returns `AlreadyRunning` instead of launching a
    /// second process for a running isolate.
    async fn start_isolate(&self, descriptor: &IsolateDescriptor) -> StartResult;

    /// Requests termination; does not wait for the process to exit.
    async fn stop_isolate(&self, isolate: &str);

    async fn ping(&self, isolate: &str) -> PingStatus;

    /// Whether `forker_id` is the forker serving `node`.
    fn is_on_node(&self, forker_id: &ForkerId, node: &str) -> bool;

    /// One-way latch: every later `start_isolate` is refused.
    async fn set_platform_stopping(&self);

    fn node_name(&self) -> &str;
}
