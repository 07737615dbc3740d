//! Unified error types for the observatory controller.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! control loop's error handling uniform. Subsystem errors (`ConfigError`,
//! `DeviceError`, `RegistryError`) stay separate so their call sites can
//! match on them without pulling in unrelated variants.

use core::fmt;

use crate::registry::RegistryError;

// ---------------------------------------------------------------------------
// Top-level controller error
// ---------------------------------------------------------------------------

/// Every fallible operation in the controller funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No transition matches `(state, trigger)`; the machine did not move.
    InvalidTransition { state: String, trigger: String },
    /// The named safety condition does not hold.
    UnsafeCondition { condition: String },
    /// The registry could not resolve the service before the deadline.
    ServiceUnavailable { service: String },
    /// A remote device operation failed or timed out.
    Device(DeviceError),
    /// Configuration is invalid; fatal at startup.
    Configuration(ConfigError),
    /// `renew` for a name with no live lease.
    UnknownService(String),
    /// The command is not supported by the bound device kind.
    UnsupportedOperation { device: String, operation: &'static str },
    /// Registry transport or protocol failure.
    Registry(RegistryError),
    /// `stop` requested while the machine is not parked.
    StopRefused { state: String },
    /// `start` requested while an interrupt is draining or after the loop
    /// has stopped.
    StartRefused { state: String },
    /// A target-driven action ran with no current observation.
    NoTarget { action: &'static str },
    /// Parking did not complete within the attempt budget. Operator alert.
    ParkingFailed { attempts: u32 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { state, trigger } => {
                write!(f, "invalid transition: no '{trigger}' edge from '{state}'")
            }
            Self::UnsafeCondition { condition } => write!(f, "unsafe condition: {condition}"),
            Self::ServiceUnavailable { service } => write!(f, "service unavailable: {service}"),
            Self::Device(e) => write!(f, "device: {e}"),
            Self::Configuration(e) => write!(f, "configuration: {e}"),
            Self::UnknownService(name) => write!(f, "unknown service: {name}"),
            Self::UnsupportedOperation { device, operation } => {
                write!(f, "operation '{operation}' not supported by '{device}'")
            }
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::StopRefused { state } => write!(f, "stop refused: machine is in '{state}'"),
            Self::StartRefused { state } => write!(f, "start refused in '{state}'"),
            Self::NoTarget { action } => write!(f, "{action}: no current observation"),
            Self::ParkingFailed { attempts } => {
                write!(f, "PARKING FAILED after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Raised while loading, validating or building from configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A state references a horizon that is not in the horizon table.
    UnknownHorizon(String),
    /// Horizon thresholds violate `startup ≥ twilight_max ≥ flat ≥ focus ≥ observe`.
    HorizonOrder { higher: String, lower: String },
    /// Two states share a name.
    DuplicateState(String),
    /// A transition or action list names an undeclared state.
    UnknownState(String),
    /// A state carries an unrecognised tag.
    UnknownTag { state: String, tag: String },
    /// `(source, trigger)` appears on more than one transition.
    AmbiguousTransition { state: String, trigger: String },
    /// Non-`always_safe` state without a horizon condition.
    MissingHorizon(String),
    /// State cannot be reached from the initial state.
    UnreachableState(String),
    /// Non-terminal state with no outgoing transition.
    OrphanState(String),
    /// State lacks the universal park edge.
    MissingParkTransition(String),
    /// No trigger path leads back to the parked state.
    NoPathToParked(String),
    /// An action references an unbound device role.
    UnknownDevice(String),
    /// Two bindings share a role.
    DuplicateDevice(String),
    /// A configured action is not supported by the device kind it targets.
    UnsupportedOperation { device: String, operation: &'static str },
    /// A scalar is out of range.
    Invalid(&'static str),
    /// No stored configuration exists.
    NotFound,
    /// Stored configuration could not be parsed.
    Corrupted(String),
    /// Storage I/O failed.
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownHorizon(h) => write!(f, "unknown horizon '{h}'"),
            Self::HorizonOrder { higher, lower } => {
                write!(f, "horizon '{higher}' must not be below '{lower}'")
            }
            Self::DuplicateState(s) => write!(f, "duplicate state '{s}'"),
            Self::UnknownState(s) => write!(f, "unknown state '{s}'"),
            Self::UnknownTag { state, tag } => write!(f, "state '{state}' has unknown tag '{tag}'"),
            Self::AmbiguousTransition { state, trigger } => {
                write!(f, "trigger '{trigger}' defined twice from '{state}'")
            }
            Self::MissingHorizon(s) => {
                write!(f, "state '{s}' needs a horizon or the always_safe tag")
            }
            Self::UnreachableState(s) => write!(f, "state '{s}' is unreachable"),
            Self::OrphanState(s) => write!(f, "state '{s}' has no outgoing transition"),
            Self::MissingParkTransition(s) => write!(f, "state '{s}' has no park transition"),
            Self::NoPathToParked(s) => write!(f, "no path from '{s}' back to parked"),
            Self::UnknownDevice(d) => write!(f, "unknown device role '{d}'"),
            Self::DuplicateDevice(d) => write!(f, "device role '{d}' bound twice"),
            Self::UnsupportedOperation { device, operation } => {
                write!(f, "device '{device}' does not support '{operation}'")
            }
            Self::Invalid(msg) => write!(f, "invalid value: {msg}"),
            Self::NotFound => write!(f, "configuration not found"),
            Self::Corrupted(msg) => write!(f, "configuration corrupted: {msg}"),
            Self::Io(msg) => write!(f, "configuration I/O: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e)
    }
}

// ---------------------------------------------------------------------------
// Device errors
// ---------------------------------------------------------------------------

/// Why a device call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFailure {
    /// The per-call timeout elapsed.
    Timeout,
    /// Connect, write or read failed.
    Transport(String),
    /// The device service answered with a structured fault.
    Remote(String),
    /// The reply did not match the command.
    Protocol(String),
}

impl fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Remote(msg) => write!(f, "remote fault: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
        }
    }
}

/// A failed remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    pub service: String,
    pub operation: &'static str,
    pub cause: DeviceFailure,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {}", self.service, self.operation, self.cause)
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Self::Device(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownService(name) => Self::UnknownService(name),
            other => Self::Registry(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
