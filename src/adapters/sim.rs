//! Simulated devices and a fixed target list.
//!
//! The host binary serves these over TCP so the full registry → proxy →
//! device path runs without hardware. Each simulator keeps just enough
//! state to refuse impossible requests, such as slewing a parked mount.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::app::ports::{Observation, TargetScheduler};
use crate::clock::Clock;
use crate::devices::service::DeviceService;
use crate::devices::{
    CameraCommand, DeviceCommand, DeviceKind, DeviceReply, DeviceStatus, DomeCommand, FrameType,
    MountCommand, SensorCommand,
};
use crate::sensors::{PowerReading, WeatherReading};

fn unexpected(kind: DeviceKind, command: &DeviceCommand) -> String {
    format!("{} cannot run '{}'", kind.as_str(), command.operation())
}

// ── Camera ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SimCamera {
    cooling: bool,
    frames: u64,
}

impl SimCamera {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceService for SimCamera {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Camera
    }

    fn handle(&mut self, command: &DeviceCommand) -> Result<DeviceReply, String> {
        let DeviceCommand::Camera(c) = command else {
            return Err(unexpected(self.kind(), command));
        };
        match c {
            CameraCommand::Expose { seconds, frame } => {
                if *seconds < 0.0 {
                    return Err(format!("negative exposure {seconds}s"));
                }
                if !self.cooling && *frame != FrameType::Bias {
                    debug!("SIM camera: {frame:?} exposure without cooling");
                }
                self.frames += 1;
                Ok(DeviceReply::Exposure {
                    frame_id: self.frames,
                })
            }
            CameraCommand::SetCooling { enabled } => {
                self.cooling = *enabled;
                Ok(DeviceReply::Done)
            }
            CameraCommand::Autofocus { .. } => Ok(DeviceReply::Done),
            CameraCommand::GetStatus => Ok(DeviceReply::Status(DeviceStatus {
                kind: DeviceKind::Camera,
                busy: false,
                summary: format!("cooling={} frames={}", self.cooling, self.frames),
            })),
        }
    }
}

// ── Mount ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SimMount {
    parked: bool,
    pointing: Option<(f64, f64)>,
}

impl Default for SimMount {
    fn default() -> Self {
        Self {
            parked: true,
            pointing: None,
        }
    }
}

impl SimMount {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceService for SimMount {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Mount
    }

    fn handle(&mut self, command: &DeviceCommand) -> Result<DeviceReply, String> {
        let DeviceCommand::Mount(m) = command else {
            return Err(unexpected(self.kind(), command));
        };
        match m {
            MountCommand::Unpark => self.parked = false,
            MountCommand::SlewTo { ra_deg, dec_deg } => {
                if self.parked {
                    return Err("mount is parked".into());
                }
                if !(0.0..360.0).contains(ra_deg) || !(-90.0..=90.0).contains(dec_deg) {
                    return Err(format!("bad coordinates ({ra_deg}, {dec_deg})"));
                }
                self.pointing = Some((*ra_deg, *dec_deg));
            }
            MountCommand::SlewToHome => self.pointing = None,
            MountCommand::Park => {
                self.pointing = None;
                self.parked = true;
            }
            MountCommand::GetStatus => {
                return Ok(DeviceReply::Status(DeviceStatus {
                    kind: DeviceKind::Mount,
                    busy: false,
                    summary: format!("parked={} pointing={:?}", self.parked, self.pointing),
                }));
            }
        }
        Ok(DeviceReply::Done)
    }
}

// ── Dome ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SimDome {
    open: bool,
}

impl SimDome {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceService for SimDome {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Dome
    }

    fn handle(&mut self, command: &DeviceCommand) -> Result<DeviceReply, String> {
        let DeviceCommand::Dome(d) = command else {
            return Err(unexpected(self.kind(), command));
        };
        match d {
            DomeCommand::Open => self.open = true,
            DomeCommand::Close | DomeCommand::Park => self.open = false,
            DomeCommand::GetStatus => {
                return Ok(DeviceReply::Status(DeviceStatus {
                    kind: DeviceKind::Dome,
                    busy: false,
                    summary: if self.open { "open" } else { "closed" }.into(),
                }));
            }
        }
        Ok(DeviceReply::Done)
    }
}

// ── Weather and power ─────────────────────────────────────────

/// Shared knobs for the simulated weather.
#[derive(Debug, Clone, Default)]
pub struct SkyControl(Arc<Mutex<bool>>);

impl SkyControl {
    pub fn set_raining(&self, raining: bool) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = raining;
        info!("SIM weather: raining={raining}");
    }

    fn raining(&self) -> bool {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fresh readings stamped by the given clock.
pub struct SimWeatherStation {
    clock: Arc<dyn Clock>,
    sky: SkyControl,
}

impl SimWeatherStation {
    pub fn new(clock: Arc<dyn Clock>, sky: SkyControl) -> Self {
        Self { clock, sky }
    }
}

impl DeviceService for SimWeatherStation {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Weather
    }

    fn handle(&mut self, command: &DeviceCommand) -> Result<DeviceReply, String> {
        match command {
            DeviceCommand::Sensor(SensorCommand::GetReading) => {
                let mut reading = WeatherReading::clear(self.clock.utc());
                if self.sky.raining() {
                    reading.is_raining = true;
                    reading.is_wet = true;
                    reading.humidity_percent = Some(97.0);
                }
                Ok(DeviceReply::Weather(reading))
            }
            other => Err(unexpected(self.kind(), other)),
        }
    }
}

pub struct SimPowerSupply {
    clock: Arc<dyn Clock>,
}

impl SimPowerSupply {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl DeviceService for SimPowerSupply {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Power
    }

    fn handle(&mut self, command: &DeviceCommand) -> Result<DeviceReply, String> {
        match command {
            DeviceCommand::Sensor(SensorCommand::GetReading) => {
                Ok(DeviceReply::Power(PowerReading::nominal(self.clock.utc())))
            }
            other => Err(unexpected(self.kind(), other)),
        }
    }
}

/// Simulator for a bound device kind.
pub fn simulator_for(
    kind: DeviceKind,
    clock: &Arc<dyn Clock>,
    sky: &SkyControl,
) -> Box<dyn DeviceService> {
    match kind {
        DeviceKind::Camera => Box::new(SimCamera::new()),
        DeviceKind::Mount => Box::new(SimMount::new()),
        DeviceKind::Dome => Box::new(SimDome::new()),
        DeviceKind::Weather => Box::new(SimWeatherStation::new(Arc::clone(clock), sky.clone())),
        DeviceKind::Power => Box::new(SimPowerSupply::new(Arc::clone(clock))),
    }
}

// ── Target list ───────────────────────────────────────────────

/// Observes each target once, in order.
#[derive(Debug, Default)]
pub struct TargetList {
    pending: Vec<Observation>,
    done: Vec<String>,
}

impl TargetList {
    pub fn new(targets: Vec<Observation>) -> Self {
        Self {
            pending: targets,
            done: Vec::new(),
        }
    }

    pub fn completed(&self) -> &[String] {
        &self.done
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl TargetScheduler for TargetList {
    fn next_observation(&mut self, _now: DateTime<Utc>) -> Option<Observation> {
        self.pending.first().cloned()
    }

    fn observation_complete(&mut self, observation: &Observation) {
        if let Some(i) = self.pending.iter().position(|o| o.name == observation.name) {
            let obs = self.pending.remove(i);
            info!("SIM scheduler: {} complete", obs.name);
            self.done.push(obs.name);
        }
    }
}

/// A short southern-sky list for the simulated night.
pub fn demo_targets() -> Vec<Observation> {
    let obs = |name: &str, ra_deg, dec_deg| Observation {
        name: name.to_owned(),
        ra_deg,
        dec_deg,
        exposure_secs: 1.0,
    };
    vec![
        obs("NGC 300", 13.72, -37.68),
        obs("NGC 253", 11.89, -25.29),
        obs("M83", 204.25, -29.87),
    ]
}
