//! Power supply readings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::safety::SafetyFault;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerReading {
    pub taken_at: DateTime<Utc>,
    /// Mains supply present.
    pub mains_ok: bool,
    /// UPS charge, if the supply reports one.
    pub battery_percent: Option<f32>,
}

impl PowerReading {
    pub fn nominal(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            mains_ok: true,
            battery_percent: Some(100.0),
        }
    }

    pub fn faults(&self, limits: &PowerLimits) -> u16 {
        let mut faults = 0;
        if !self.mains_ok {
            faults |= SafetyFault::MainsDown.mask();
        }
        if let Some(b) = self.battery_percent {
            if b < limits.min_battery_percent {
                faults |= SafetyFault::BatteryLow.mask();
            }
        }
        faults
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerLimits {
    pub min_battery_percent: f32,
}

impl Default for PowerLimits {
    fn default() -> Self {
        Self {
            min_battery_percent: 30.0,
        }
    }
}
