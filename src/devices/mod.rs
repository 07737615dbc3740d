//! Remote devices: what can be asked of them and how.
//!
//! Every capability has its own command enum, so the set of operations is
//! closed and checked by the compiler. A [`DeviceBinding`] ties a role in
//! the configuration (`camera0`, `mount`, …) to a registry service name and
//! a [`DeviceKind`]. Typed handles ([`Camera`], [`Mount`], [`Dome`],
//! [`SensorStation`]) can only be built from a binding of the right kind,
//! which moves "does this device support that?" from the wire to startup.

pub mod proxy;
pub mod service;
pub mod transport;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceFailure, Error, Result};
use crate::registry::ServiceAddress;
use crate::sensors::{PowerReading, WeatherReading};

pub use proxy::DeviceProxy;
pub use service::{DeviceServer, DeviceService};
pub use transport::{DeviceTransport, TcpDeviceTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Camera,
    Mount,
    Dome,
    Weather,
    Power,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Camera => "camera",
            Self::Mount => "mount",
            Self::Dome => "dome",
            Self::Weather => "weather",
            Self::Power => "power",
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Light,
    Dark,
    Bias,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraCommand {
    Expose { seconds: f32, frame: FrameType },
    SetCooling { enabled: bool },
    Autofocus { coarse: bool },
    GetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountCommand {
    Unpark,
    SlewTo { ra_deg: f64, dec_deg: f64 },
    SlewToHome,
    Park,
    GetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomeCommand {
    Open,
    Close,
    Park,
    GetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorCommand {
    GetReading,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCommand {
    Camera(CameraCommand),
    Mount(MountCommand),
    Dome(DomeCommand),
    Sensor(SensorCommand),
}

impl DeviceCommand {
    /// Operation name used in logs and errors.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Camera(c) => match c {
                CameraCommand::Expose { .. } => "expose",
                CameraCommand::SetCooling { .. } => "set_cooling",
                CameraCommand::Autofocus { .. } => "autofocus",
                CameraCommand::GetStatus => "get_status",
            },
            Self::Mount(m) => match m {
                MountCommand::Unpark => "unpark",
                MountCommand::SlewTo { .. } => "slew_to",
                MountCommand::SlewToHome => "slew_to_home",
                MountCommand::Park => "park",
                MountCommand::GetStatus => "get_status",
            },
            Self::Dome(d) => match d {
                DomeCommand::Open => "open",
                DomeCommand::Close => "close",
                DomeCommand::Park => "park",
                DomeCommand::GetStatus => "get_status",
            },
            Self::Sensor(SensorCommand::GetReading) => "get_reading",
        }
    }

    pub fn supported_by(&self, kind: DeviceKind) -> bool {
        matches!(
            (self, kind),
            (Self::Camera(_), DeviceKind::Camera)
                | (Self::Mount(_), DeviceKind::Mount)
                | (Self::Dome(_), DeviceKind::Dome)
                | (Self::Sensor(_), DeviceKind::Weather | DeviceKind::Power)
        )
    }
}

// ---------------------------------------------------------------------------
// Replies and wire envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub kind: DeviceKind,
    pub busy: bool,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceReply {
    Done,
    Status(DeviceStatus),
    Exposure { frame_id: u64 },
    Weather(WeatherReading),
    Power(PowerReading),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRequest {
    pub command: DeviceCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceResponse {
    Ok(DeviceReply),
    Fault { message: String },
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Binds a configuration role to a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceBinding {
    /// Name used by action lists, e.g. `camera0`.
    pub role: String,
    /// Registry name, e.g. `huntsman.cam0`.
    pub service: String,
    pub kind: DeviceKind,
    /// Fixed address that skips the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<ServiceAddress>,
}

impl DeviceBinding {
    pub fn new(role: &str, service: &str, kind: DeviceKind) -> Self {
        Self {
            role: role.to_owned(),
            service: service.to_owned(),
            kind,
            address: None,
        }
    }

    fn expect_kind(&self, kinds: &[DeviceKind], operation: &'static str) -> Result<()> {
        if kinds.contains(&self.kind) {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation {
                device: self.role.clone(),
                operation,
            })
        }
    }
}

fn protocol_error(binding: &DeviceBinding, operation: &'static str, reply: &DeviceReply) -> Error {
    Error::Device(DeviceError {
        service: binding.service.clone(),
        operation,
        cause: DeviceFailure::Protocol(format!("unexpected reply {reply:?}")),
    })
}

// ---------------------------------------------------------------------------
// Typed handles
// ---------------------------------------------------------------------------

pub struct Camera<'a> {
    proxy: &'a DeviceProxy,
    binding: &'a DeviceBinding,
    timeout: Duration,
}

impl<'a> Camera<'a> {
    pub fn new(proxy: &'a DeviceProxy, binding: &'a DeviceBinding, timeout: Duration) -> Result<Self> {
        binding.expect_kind(&[DeviceKind::Camera], "camera")?;
        Ok(Self {
            proxy,
            binding,
            timeout,
        })
    }

    pub fn send(&self, command: CameraCommand) -> Result<DeviceReply> {
        self.proxy
            .invoke_binding(self.binding, &DeviceCommand::Camera(command), self.timeout)
    }

    /// Returns the frame id.
    pub fn expose(&self, seconds: f32, frame: FrameType) -> Result<u64> {
        match self.send(CameraCommand::Expose { seconds, frame })? {
            DeviceReply::Exposure { frame_id } => Ok(frame_id),
            other => Err(protocol_error(self.binding, "expose", &other)),
        }
    }
}

pub struct Mount<'a> {
    proxy: &'a DeviceProxy,
    binding: &'a DeviceBinding,
    timeout: Duration,
}

impl<'a> Mount<'a> {
    pub fn new(proxy: &'a DeviceProxy, binding: &'a DeviceBinding, timeout: Duration) -> Result<Self> {
        binding.expect_kind(&[DeviceKind::Mount], "mount")?;
        Ok(Self {
            proxy,
            binding,
            timeout,
        })
    }

    pub fn send(&self, command: MountCommand) -> Result<DeviceReply> {
        self.proxy
            .invoke_binding(self.binding, &DeviceCommand::Mount(command), self.timeout)
    }

    pub fn slew_to(&self, ra_deg: f64, dec_deg: f64) -> Result<()> {
        self.send(MountCommand::SlewTo { ra_deg, dec_deg }).map(|_| ())
    }
}

pub struct Dome<'a> {
    proxy: &'a DeviceProxy,
    binding: &'a DeviceBinding,
    timeout: Duration,
}

impl<'a> Dome<'a> {
    pub fn new(proxy: &'a DeviceProxy, binding: &'a DeviceBinding, timeout: Duration) -> Result<Self> {
        binding.expect_kind(&[DeviceKind::Dome], "dome")?;
        Ok(Self {
            proxy,
            binding,
            timeout,
        })
    }

    pub fn send(&self, command: DomeCommand) -> Result<DeviceReply> {
        self.proxy
            .invoke_binding(self.binding, &DeviceCommand::Dome(command), self.timeout)
    }
}

/// A weather or power service.
pub struct SensorStation<'a> {
    proxy: &'a DeviceProxy,
    binding: &'a DeviceBinding,
    timeout: Duration,
}

impl<'a> SensorStation<'a> {
    pub fn new(proxy: &'a DeviceProxy, binding: &'a DeviceBinding, timeout: Duration) -> Result<Self> {
        binding.expect_kind(&[DeviceKind::Weather, DeviceKind::Power], "get_reading")?;
        Ok(Self {
            proxy,
            binding,
            timeout,
        })
    }

    pub fn kind(&self) -> DeviceKind {
        self.binding.kind
    }

    /// Fetch one reading; the reply variant must match the station kind.
    pub fn read(&self) -> Result<DeviceReply> {
        let reply = self.proxy.invoke_binding(
            self.binding,
            &DeviceCommand::Sensor(SensorCommand::GetReading),
            self.timeout,
        )?;
        match (&reply, self.binding.kind) {
            (DeviceReply::Weather(_), DeviceKind::Weather)
            | (DeviceReply::Power(_), DeviceKind::Power) => Ok(reply),
            _ => Err(protocol_error(self.binding, "get_reading", &reply)),
        }
    }
}
