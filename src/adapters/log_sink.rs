//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing one structured line per control
//! event. A paging or chat adapter would implement the same trait.

use log::{error, info, warn};

use crate::app::events::ControlEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`ControlEvent`].
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

/// The line written for `event`, without level.
pub fn render(event: &ControlEvent) -> String {
    match event {
        ControlEvent::Started { state, at } => {
            format!("START | state={state} at={}", at.format("%H:%M:%S"))
        }
        ControlEvent::Transition {
            from, to, trigger, ..
        } => format!("STATE | {from} -> {to} [{trigger}]"),
        ControlEvent::SafetyFailed {
            state,
            condition,
            reasons,
            ..
        } => format!(
            "SAFETY | {state} unsafe at '{condition}': {}",
            reasons.join(", ")
        ),
        ControlEvent::DeviceFailed {
            state,
            device,
            error,
            attempt,
        } => format!("DEVICE | {state}/{device} attempt {attempt}: {error}"),
        ControlEvent::TriggerRejected {
            state,
            trigger,
            reason,
        } => format!("REJECT | {state} [{trigger}]: {reason}"),
        ControlEvent::ParkingFailed { state, attempts } => {
            format!("PARKING FAILED | {state} after {attempts} attempts, operator needed")
        }
        ControlEvent::Interrupted { state } => format!("INTERRUPT | draining from {state}"),
        ControlEvent::Stopped { state } => format!("STOP | in {state}"),
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &ControlEvent) {
        let line = render(event);
        match event {
            ControlEvent::ParkingFailed { .. } => error!("{line}"),
            ControlEvent::SafetyFailed { .. }
            | ControlEvent::DeviceFailed { .. }
            | ControlEvent::TriggerRejected { .. } => warn!("{line}"),
            _ => info!("{line}"),
        }
    }
}
