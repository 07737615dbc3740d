//! Inbound commands to the controller.
//!
//! These arrive from the operator or the host binary through the
//! [`ControlHandle`](super::runner::ControlHandle) and are applied at the
//! next tick boundary.

/// Commands that the outside world can send into the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Enter `Running` and request a start from sleeping.
    Start,

    /// Drain to rest: park, then housekeeping, then sleeping.
    Interrupt,

    /// Stop the loop. Only honoured while parked.
    Stop,

    /// Interrupt, then stop as soon as the machine is parked.
    Shutdown,
}
