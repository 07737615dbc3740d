//! Port traits: the boundary between the control core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Controller (domain)
//! ```
//!
//! Devices are reached through [`Directory`](crate::registry::Directory)
//! and [`DeviceTransport`](crate::devices::DeviceTransport); the traits here
//! cover what is left: where events go, which target to observe next, and
//! where configuration is stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SystemConfig;
use crate::error::ConfigError;

use super::events::ControlEvent;

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → logging / alerting)
// ───────────────────────────────────────────────────────────────

/// The controller emits structured [`ControlEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &ControlEvent);
}

// ───────────────────────────────────────────────────────────────
// Target scheduler port
// ───────────────────────────────────────────────────────────────

/// One pointing and exposure chosen by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub name: String,
    pub ra_deg: f64,
    pub dec_deg: f64,
    pub exposure_secs: f32,
}

/// Picks what to observe. Selection logic lives outside the core.
pub trait TargetScheduler: Send {
    /// Best observation for `now`, or `None` when nothing is observable.
    fn next_observation(&mut self, now: DateTime<Utc>) -> Option<Observation>;

    /// The observing state finished `observation`.
    fn observation_complete(&mut self, observation: &Observation);
}

// ───────────────────────────────────────────────────────────────
// Configuration port
// ───────────────────────────────────────────────────────────────

/// Loads and persists system configuration.
///
/// Implementations validate before persisting; out-of-range values are
/// rejected, never clamped.
pub trait ConfigPort {
    /// [`ConfigError::NotFound`] when nothing is stored yet.
    fn load(&self) -> Result<SystemConfig, ConfigError>;

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError>;
}
