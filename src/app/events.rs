//! Outbound control events.
//!
//! The [`Controller`](super::service::Controller) emits these through the
//! [`EventSink`](super::ports::EventSink) port. Adapters on the other side
//! decide what to do with them: log, page an operator, record for tests.

use chrono::{DateTime, Utc};

use crate::error::Error;

/// One completed transition, also kept in the controller's history.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRecord {
    pub from: String,
    pub to: String,
    pub trigger: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// The loop entered `Running`.
    Started { state: String, at: DateTime<Utc> },

    /// The machine moved along an edge.
    Transition {
        from: String,
        to: String,
        trigger: String,
        at: DateTime<Utc>,
    },

    /// A safety condition failed for `state`.
    SafetyFailed {
        state: String,
        condition: String,
        reasons: Vec<String>,
        at: DateTime<Utc>,
    },

    /// A device action failed. `attempt` counts from 1.
    DeviceFailed {
        state: String,
        device: String,
        error: Error,
        attempt: u32,
    },

    /// The policy asked for a trigger the loop would not fire.
    TriggerRejected {
        state: String,
        trigger: String,
        reason: String,
    },

    /// Parking could not be completed. Needs an operator.
    ParkingFailed { state: String, attempts: u32 },

    /// The interrupt flag was seen; the machine is draining to rest.
    Interrupted { state: String },

    /// The loop stopped.
    Stopped { state: String },
}

impl From<&TransitionRecord> for ControlEvent {
    fn from(r: &TransitionRecord) -> Self {
        Self::Transition {
            from: r.from.clone(),
            to: r.to.clone(),
            trigger: r.trigger.clone(),
            at: r.at,
        }
    }
}
