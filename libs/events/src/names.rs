//! Signal names.
//!
//! Every participant must use these exact strings.
//!
//! The four platform signals are the bare `isolate-stop`, `isolate-lost`,
//! `isolate-status` and `monitor-stop-platform` signals, one to one, placed
//! under an `/orbit/` path so a prefix wildcard can select a family.

/// Asks the target isolate to stop cleanly. No payload.
pub const ISOLATE_STOP: &str = "/orbit/isolate/stop";

/// Broadcast when an isolate is considered gone. Payload: the isolate name.
pub const ISOLATE_LOST: &str = "/orbit/isolate/lost";

/// Health report from an isolate. Payload: an `IsolateStatusEvent`.
pub const ISOLATE_STATUS: &str = "/orbit/isolate/status";

/// Tells peer monitors the platform is stopping. No payload.
pub const MONITOR_STOP_PLATFORM: &str = "/orbit/monitor/stop-platform";

/// Prefix of every request served by a forker.
pub const FORKER_PREFIX: &str = "/orbit/forker/";

/// Launch request. Payload: an `IsolateDescriptor`; reply: a start result code.
pub const FORKER_START: &str = "/orbit/forker/start";

/// Termination request. Payload: the isolate name.
pub const FORKER_STOP: &str = "/orbit/forker/stop";

/// Liveness probe. Payload: the isolate name; reply: a ping status code.
pub const FORKER_PING: &str = "/orbit/forker/ping";

/// One-way latch: the forker must refuse further launches.
pub const FORKER_PLATFORM_STOPPING: &str = "/orbit/forker/platform-stopping";
