//! # orbit-events
//!
//! Wire types and the signal bus contract for the orbit isolate platform.
//!
//! Monitors, forkers and isolates never call each other directly: every
//! interaction is a *signal*, an addressed asynchronous message delivered
//! to one isolate or to a named group of isolates.
//!
//! ## Contents
//!
//! - `names`: signal names shared by every participant (must match exactly)
//! - `envelope`: the [`Signal`] envelope and [`SignalGroup`] addressing
//! - `status`: [`IsolateStatusEvent`], the health report an isolate sends
//! - `types`: [`IsolateDescriptor`] and [`ForkerRecord`]
//! - `bus`: the [`SignalBus`] and [`SignalListener`] traits
//! - `local`: [`LocalSignalHub`], an in-process bus for single-host setups and tests

mod bus;
mod envelope;
mod error;
mod local;
pub mod names;
mod status;
mod types;

pub use bus::{pattern_matches, SendResults, SignalBus, SignalListener};
pub use envelope::{Signal, SignalGroup};
pub use error::SignalError;
pub use local::{EndpointRole, LocalSignalBus, LocalSignalHub};
pub use status::{IsolateState, IsolateStatusEvent};
pub use types::{ForkerRecord, IsolateDescriptor, ModuleRef, FORKER_KIND};
