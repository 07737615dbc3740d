//! Weather station readings and the soft-limit verdict.
//!
//! Two kinds of check, mirroring how site weather feeds are judged:
//!
//! * boolean flags (`is_raining`, `is_wet`, `is_cloudy`, `is_windy`): any
//!   enabled flag that reads `true` is unsafe;
//! * numeric thresholds: humidity and wind speed must be strictly *below*
//!   their limits, the temperature/dew-point margin strictly *above* its.
//!
//! A threshold parameter that the station did not report is unsafe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::safety::SafetyFault;

/// One reading from a weather service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub taken_at: DateTime<Utc>,
    pub is_raining: bool,
    pub is_wet: bool,
    pub is_cloudy: bool,
    pub is_windy: bool,
    pub humidity_percent: Option<f32>,
    pub wind_speed_kmh: Option<f32>,
    pub ambient_temp_c: Option<f32>,
    pub dew_point_c: Option<f32>,
}

impl WeatherReading {
    /// A dry, calm, clear reading. Used by the simulators.
    pub fn clear(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            is_raining: false,
            is_wet: false,
            is_cloudy: false,
            is_windy: false,
            humidity_percent: Some(40.0),
            wind_speed_kmh: Some(8.0),
            ambient_temp_c: Some(12.0),
            dew_point_c: Some(-2.0),
        }
    }

    /// Ambient minus dew point, rounded to 0.1 °C.
    pub fn dewpoint_margin_c(&self) -> Option<f32> {
        match (self.ambient_temp_c, self.dew_point_c) {
            (Some(t), Some(d)) => Some(((t - d) * 10.0).round() / 10.0),
            _ => None,
        }
    }

    /// Faults that forbid any operation, dome open or not.
    pub fn interlock_faults(&self) -> u16 {
        let mut faults = 0;
        if self.is_raining {
            faults |= SafetyFault::Raining.mask();
        }
        if self.is_wet {
            faults |= SafetyFault::Wet.mask();
        }
        faults
    }

    /// Full verdict for an open dome: interlocks, flags and thresholds.
    pub fn soft_faults(&self, limits: &WeatherLimits) -> u16 {
        let mut faults = self.interlock_faults();

        for flag in &limits.unsafe_flags {
            let (raised, fault) = match flag {
                WeatherFlag::Raining => (self.is_raining, SafetyFault::Raining),
                WeatherFlag::Wet => (self.is_wet, SafetyFault::Wet),
                WeatherFlag::Cloudy => (self.is_cloudy, SafetyFault::Cloudy),
                WeatherFlag::Windy => (self.is_windy, SafetyFault::Windy),
            };
            if raised {
                faults |= fault.mask();
            }
        }

        match self.humidity_percent {
            Some(h) if h < limits.max_humidity_percent => {}
            Some(_) => faults |= SafetyFault::HumidityHigh.mask(),
            None => faults |= SafetyFault::WeatherParameterMissing.mask(),
        }
        match self.wind_speed_kmh {
            Some(w) if w < limits.max_wind_speed_kmh => {}
            Some(_) => faults |= SafetyFault::WindHigh.mask(),
            None => faults |= SafetyFault::WeatherParameterMissing.mask(),
        }
        match self.dewpoint_margin_c() {
            Some(m) if m > limits.min_dewpoint_margin_c => {}
            Some(_) => faults |= SafetyFault::DewpointMarginLow.mask(),
            None => faults |= SafetyFault::WeatherParameterMissing.mask(),
        }

        faults
    }
}

/// Boolean flags that may be configured as unsafe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherFlag {
    Raining,
    Wet,
    Cloudy,
    Windy,
}

/// Soft weather limits applied when the dome is to be opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLimits {
    /// Relative humidity must stay strictly below this.
    pub max_humidity_percent: f32,
    /// Average wind speed must stay strictly below this.
    pub max_wind_speed_kmh: f32,
    /// Ambient temperature must exceed the dew point by more than this.
    pub min_dewpoint_margin_c: f32,
    pub unsafe_flags: Vec<WeatherFlag>,
}

impl Default for WeatherLimits {
    fn default() -> Self {
        Self {
            max_humidity_percent: 85.0,
            max_wind_speed_kmh: 40.0,
            min_dewpoint_margin_c: 3.0,
            unsafe_flags: vec![
                WeatherFlag::Raining,
                WeatherFlag::Wet,
                WeatherFlag::Cloudy,
                WeatherFlag::Windy,
            ],
        }
    }
}
