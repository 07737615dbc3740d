//! Sensor readings and the shared [`SensorCache`].
//!
//! The control loop refreshes the cache by polling the weather and power
//! services each tick; the safety evaluator only ever reads a snapshot.
//! A service that stops answering leaves its last reading in place, which
//! then ages past the staleness window and turns unsafe.

pub mod power;
pub mod weather;

use std::sync::{PoisonError, RwLock};

pub use power::{PowerLimits, PowerReading};
pub use weather::{WeatherFlag, WeatherLimits, WeatherReading};

/// Latest reading from each source, if any has ever arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    pub weather: Option<WeatherReading>,
    pub power: Option<PowerReading>,
}

#[derive(Debug, Default)]
pub struct SensorCache {
    inner: RwLock<SensorSnapshot>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_weather(&self, reading: WeatherReading) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .weather = Some(reading);
    }

    pub fn update_power(&self, reading: PowerReading) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .power = Some(reading);
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
