//! Safety evaluator.
//!
//! Decides whether the observatory may remain in a state. Each state names
//! a horizon; the state is safe only if:
//!
//! 1. the sun is strictly below that horizon's altitude threshold;
//! 2. a weather and a power reading are present and fresher than their
//!    staleness windows;
//! 3. no hard interlock (rain, wetness, mains failure) is tripped;
//! 4. for dome-open states, the weather soft limits also pass.
//!
//! Failed checks accumulate in a fault bitmask so a single verdict can
//! report every reason at once. Missing or stale data always counts as a
//! fault; there is no "assume safe" fallback.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};
use crate::sensors::{PowerLimits, SensorCache, SensorSnapshot, WeatherLimits};
use crate::solar::{self, ObserverLocation};

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

/// One failed safety check. Several are accumulated in a `u16` mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SafetyFault {
    SunAboveHorizon = 1 << 0,
    WeatherMissing = 1 << 1,
    WeatherStale = 1 << 2,
    PowerMissing = 1 << 3,
    PowerStale = 1 << 4,
    Raining = 1 << 5,
    Wet = 1 << 6,
    MainsDown = 1 << 7,
    Cloudy = 1 << 8,
    Windy = 1 << 9,
    HumidityHigh = 1 << 10,
    WindHigh = 1 << 11,
    DewpointMarginLow = 1 << 12,
    WeatherParameterMissing = 1 << 13,
    BatteryLow = 1 << 14,
}

impl SafetyFault {
    pub const ALL: [Self; 15] = [
        Self::SunAboveHorizon,
        Self::WeatherMissing,
        Self::WeatherStale,
        Self::PowerMissing,
        Self::PowerStale,
        Self::Raining,
        Self::Wet,
        Self::MainsDown,
        Self::Cloudy,
        Self::Windy,
        Self::HumidityHigh,
        Self::WindHigh,
        Self::DewpointMarginLow,
        Self::WeatherParameterMissing,
        Self::BatteryLow,
    ];

    pub const fn mask(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SunAboveHorizon => "sun above horizon",
            Self::WeatherMissing => "no weather reading",
            Self::WeatherStale => "weather reading stale",
            Self::PowerMissing => "no power reading",
            Self::PowerStale => "power reading stale",
            Self::Raining => "raining",
            Self::Wet => "wet",
            Self::MainsDown => "mains power down",
            Self::Cloudy => "cloudy",
            Self::Windy => "windy",
            Self::HumidityHigh => "humidity too high",
            Self::WindHigh => "wind too strong",
            Self::DewpointMarginLow => "too close to dew point",
            Self::WeatherParameterMissing => "weather parameter missing",
            Self::BatteryLow => "UPS battery low",
        };
        f.write_str(s)
    }
}

/// Verdict of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyReport {
    pub horizon: String,
    pub sun_altitude_deg: f64,
    pub faults: u16,
}

impl SafetyReport {
    pub fn is_safe(&self) -> bool {
        self.faults == 0
    }

    pub fn has(&self, fault: SafetyFault) -> bool {
        self.faults & fault.mask() != 0
    }

    /// Human-readable reasons, one per fault.
    pub fn reasons(&self) -> Vec<String> {
        SafetyFault::ALL
            .iter()
            .filter(|f| self.has(**f))
            .map(ToString::to_string)
            .collect()
    }
}

impl fmt::Display for SafetyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_safe() {
            write!(f, "{}: safe (sun {:.1}°)", self.horizon, self.sun_altitude_deg)
        } else {
            write!(
                f,
                "{}: UNSAFE (sun {:.1}°) [{}]",
                self.horizon,
                self.sun_altitude_deg,
                self.reasons().join(", ")
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Horizons
// ---------------------------------------------------------------------------

/// Horizon names with a required ordering, highest first.
pub const HORIZON_ORDER: [&str; 5] = ["startup", "twilight_max", "flat", "focus", "observe"];

/// A resolved horizon condition. Only obtainable from a [`HorizonTable`],
/// so holding one means the name was valid at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Horizon {
    name: Arc<str>,
    altitude_deg: f64,
}

impl Horizon {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn altitude_deg(&self) -> f64 {
        self.altitude_deg
    }
}

/// Validated table of named sun-altitude thresholds (degrees).
#[derive(Debug, Clone)]
pub struct HorizonTable {
    thresholds: BTreeMap<String, f64>,
}

impl HorizonTable {
    pub fn new(thresholds: BTreeMap<String, f64>) -> core::result::Result<Self, ConfigError> {
        if thresholds.values().any(|v| !v.is_finite() || !(-90.0..=90.0).contains(v)) {
            return Err(ConfigError::Invalid("horizon altitude outside [-90, 90]"));
        }

        let ordered: Vec<(&str, f64)> = HORIZON_ORDER
            .iter()
            .filter_map(|name| thresholds.get(*name).map(|alt| (*name, *alt)))
            .collect();
        for pair in ordered.windows(2) {
            let ((higher, h_alt), (lower, l_alt)) = (pair[0], pair[1]);
            if h_alt < l_alt {
                return Err(ConfigError::HorizonOrder {
                    higher: higher.to_owned(),
                    lower: lower.to_owned(),
                });
            }
        }

        Ok(Self { thresholds })
    }

    pub fn resolve(&self, name: &str) -> core::result::Result<Horizon, ConfigError> {
        self.thresholds
            .get(name)
            .map(|alt| Horizon {
                name: Arc::from(name),
                altitude_deg: *alt,
            })
            .ok_or_else(|| ConfigError::UnknownHorizon(name.to_owned()))
    }
}

/// Default thresholds for a dark site.
pub fn default_horizons() -> BTreeMap<String, f64> {
    [
        ("startup", -3.0),
        ("twilight_max", -6.0),
        ("flat", -8.0),
        ("focus", -12.0),
        ("observe", -18.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect()
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Whether the check is for a state that opens the dome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enclosure {
    Open,
    Closed,
}

/// Tunables for the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Weather older than this is treated as missing.
    pub weather_staleness_secs: u32,
    /// Power readings older than this are treated as missing.
    pub power_staleness_secs: u32,
    pub weather: WeatherLimits,
    pub power: PowerLimits,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            weather_staleness_secs: 180,
            power_staleness_secs: 180,
            weather: WeatherLimits::default(),
            power: PowerLimits::default(),
        }
    }
}

pub struct SafetyEvaluator {
    location: ObserverLocation,
    horizons: HorizonTable,
    weather_staleness: TimeDelta,
    power_staleness: TimeDelta,
    weather_limits: WeatherLimits,
    power_limits: PowerLimits,
    sensors: Arc<SensorCache>,
}

impl SafetyEvaluator {
    pub fn new(
        location: ObserverLocation,
        horizons: HorizonTable,
        config: &SafetyConfig,
        sensors: Arc<SensorCache>,
    ) -> Self {
        Self {
            location,
            horizons,
            weather_staleness: TimeDelta::seconds(i64::from(config.weather_staleness_secs)),
            power_staleness: TimeDelta::seconds(i64::from(config.power_staleness_secs)),
            weather_limits: config.weather.clone(),
            power_limits: config.power.clone(),
            sensors,
        }
    }

    pub fn horizons(&self) -> &HorizonTable {
        &self.horizons
    }

    pub fn horizon(&self, name: &str) -> Result<Horizon> {
        Ok(self.horizons.resolve(name)?)
    }

    pub fn current_sun_altitude(&self, now: DateTime<Utc>) -> f64 {
        solar::sun_altitude(&self.location, now)
    }

    /// Solar test only: sun strictly below the horizon.
    pub fn is_dark(&self, horizon: &Horizon, now: DateTime<Utc>) -> bool {
        self.current_sun_altitude(now) < horizon.altitude_deg
    }

    /// Full dome-open check.
    pub fn is_safe(&self, horizon: &Horizon, now: DateTime<Utc>) -> bool {
        self.evaluate(horizon, Enclosure::Open, now).is_safe()
    }

    /// Check by horizon name. An unknown name is a configuration error, not
    /// an unsafe verdict.
    pub fn is_safe_named(&self, name: &str, now: DateTime<Utc>) -> Result<bool> {
        let horizon = self.horizon(name)?;
        Ok(self.is_safe(&horizon, now))
    }

    /// Weather alone, dome open, ignoring the sun.
    pub fn weather_is_safe(&self, now: DateTime<Utc>) -> bool {
        let snapshot = self.sensors.snapshot();
        self.weather_faults(&snapshot, Enclosure::Open, now) == 0
    }

    pub fn evaluate(
        &self,
        horizon: &Horizon,
        enclosure: Enclosure,
        now: DateTime<Utc>,
    ) -> SafetyReport {
        self.evaluate_snapshot(horizon, enclosure, now, &self.sensors.snapshot())
    }

    /// Pure over (location, horizon, time, snapshot).
    pub fn evaluate_snapshot(
        &self,
        horizon: &Horizon,
        enclosure: Enclosure,
        now: DateTime<Utc>,
        snapshot: &SensorSnapshot,
    ) -> SafetyReport {
        let sun = self.current_sun_altitude(now);
        let mut faults = 0;
        if sun >= horizon.altitude_deg {
            faults |= SafetyFault::SunAboveHorizon.mask();
        }
        faults |= self.weather_faults(snapshot, enclosure, now);
        faults |= self.power_faults(snapshot, now);

        SafetyReport {
            horizon: horizon.name().to_owned(),
            sun_altitude_deg: sun,
            faults,
        }
    }

    fn weather_faults(
        &self,
        snapshot: &SensorSnapshot,
        enclosure: Enclosure,
        now: DateTime<Utc>,
    ) -> u16 {
        let Some(reading) = &snapshot.weather else {
            return SafetyFault::WeatherMissing.mask();
        };
        if !is_fresh(reading.taken_at, now, self.weather_staleness) {
            return SafetyFault::WeatherStale.mask();
        }
        match enclosure {
            Enclosure::Open => reading.soft_faults(&self.weather_limits),
            Enclosure::Closed => reading.interlock_faults(),
        }
    }

    fn power_faults(&self, snapshot: &SensorSnapshot, now: DateTime<Utc>) -> u16 {
        let Some(reading) = &snapshot.power else {
            return SafetyFault::PowerMissing.mask();
        };
        if !is_fresh(reading.taken_at, now, self.power_staleness) {
            return SafetyFault::PowerStale.mask();
        }
        reading.faults(&self.power_limits)
    }
}

/// How far a reading may be stamped ahead of our clock and still count.
const FUTURE_SKEW_SECS: i64 = 5;

/// Within the window, and not from the future beyond a little clock skew.
fn is_fresh(taken_at: DateTime<Utc>, now: DateTime<Utc>, window: TimeDelta) -> bool {
    let age = now - taken_at;
    age <= window && age >= TimeDelta::seconds(-FUTURE_SKEW_SECS)
}

impl From<SafetyReport> for Error {
    fn from(report: SafetyReport) -> Self {
        Self::UnsafeCondition {
            condition: report.to_string(),
        }
    }
}
