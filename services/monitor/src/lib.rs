//! orbit monitor
//!
//! The monitor tracks isolate health and drives the platform lifecycle.
//!
//! ## Architecture
//!
//! - **Platform file**: isolate templates, capabilities and the component
//!   tree, placed by the resolver
//! - **Directory**: descriptors of the isolates this monitor manages, planned
//!   from a component placement
//! - **Forker registry**: which forker serves which node
//! - **Coordinator**: status filtering, failure policy, isolate starts and
//!   the two-phase platform stop
//! - **Signal listener**: feeds bus signals to the coordinator

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod forkers;
pub mod listener;
pub mod platform;

mod error;

pub use coordinator::{
    ForkerStopHandler, MonitorConfig, MonitorCoordinator, ShutdownReport, StatusOutcome,
};
pub use directory::{plan_isolates, plan_platform, IsolateCondition, IsolateDirectory};
pub use error::MonitorError;
pub use forkers::{ForkerEvent, ForkerEventKind, ForkerRegistry};
pub use listener::MonitorSignalListener;
pub use platform::PlatformFile;
