//! Application core.
//!
//! The control loop and the ports it talks through. The loop itself does no
//! I/O: devices, registry, scheduler, clock and event output are all
//! reached through traits, so the whole night can run against mocks.

pub mod commands;
pub mod events;
pub mod ports;
pub mod runner;
pub mod service;

pub use commands::ControlCommand;
pub use events::{ControlEvent, TransitionRecord};
pub use ports::{ConfigPort, EventSink, Observation, TargetScheduler};
pub use runner::{ControlHandle, spawn};
pub use service::{Controller, ControllerParts, ControllerStatus, LoopState, TickOutcome};
