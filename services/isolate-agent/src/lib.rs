//! orbit isolate agent
//!
//! Runs inside every isolate and keeps its managed modules alive.
//!
//! ## Architecture
//!
//! - **Agent**: reacts to module lifecycle events, debounces restarts and
//!   reinstalls vanished modules
//! - **Guardian**: periodic sweep re-asserting the desired module set
//! - **Status reporter**: stamped health reports to the monitors
//! - **Host**: wires the above and runs the stop sequence
//! - **Broker client**: fetches the isolate's configuration document

pub mod agent;
pub mod broker;
pub mod config;
pub mod guardian;
pub mod host;
pub mod modules;
pub mod status;

pub use agent::{Agent, AgentConfig, CriticalSection};
pub use broker::{BrokerClient, BrokerError};
pub use guardian::{Guardian, GuardianConfig, SweepReport};
pub use host::{HostConfig, IsolateHost};
pub use modules::{MockModuleRuntime, ModuleError, ModuleEvent, ModuleRuntime, ModuleState};
pub use status::StatusReporter;
