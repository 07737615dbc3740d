//! System configuration
//!
//! Every tunable of the controller in one serde tree. `Default` is a
//! working single-camera setup at Siding Spring, so a missing config file
//! still yields a runnable system.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::control::ActionConfig;
use crate::control::actions::{default_actions, default_bindings};
use crate::devices::DeviceBinding;
use crate::devices::proxy::ProxyConfig;
use crate::error::ConfigError;
use crate::fsm::GraphConfig;
use crate::fsm::states::default_graph_config;
use crate::safety::{HorizonTable, SafetyConfig, default_horizons};
use crate::solar::ObserverLocation;

/// Control loop timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Period between ticks while nothing changes.
    pub status_check_interval_ms: u64,
    /// Pause after a transition before the next tick.
    pub wait_delay_ms: u64,
    /// Failed action attempts allowed per state before escalating.
    pub max_transition_attempts: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            status_check_interval_ms: 60_000,
            wait_delay_ms: 5_000,
            max_transition_attempts: 3,
        }
    }
}

/// Where the registry lives and how it cleans up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
    /// Period of the expired-lease sweep.
    pub sweep_interval_secs: u64,
    /// Lease granted to the simulated device services.
    pub default_lease_secs: u32,
    /// Socket timeout for registry client calls.
    pub client_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9090,
            sweep_interval_secs: 120,
            default_lease_secs: 60,
            client_timeout_ms: 2_000,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub location: ObserverLocation,
    /// Named sun-altitude thresholds in degrees.
    pub horizons: BTreeMap<String, f64>,
    pub safety: SafetyConfig,
    pub control: ControlConfig,
    pub proxy: ProxyConfig,
    pub registry: RegistryConfig,
    pub devices: Vec<DeviceBinding>,
    pub graph: GraphConfig,
    pub actions: Vec<ActionConfig>,
    /// Seconds the host binary runs before shutting down (0 = forever).
    pub run_secs: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            location: ObserverLocation::SIDING_SPRING,
            horizons: default_horizons(),
            safety: SafetyConfig::default(),
            control: ControlConfig::default(),
            proxy: ProxyConfig::default(),
            registry: RegistryConfig::default(),
            devices: default_bindings(),
            graph: default_graph_config(),
            actions: default_actions(),
            run_secs: 0,
        }
    }
}

impl SystemConfig {
    /// Range checks. Graph and action structure are checked when they are
    /// built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let loc = &self.location;
        if !(-90.0..=90.0).contains(&loc.latitude_deg) {
            return Err(ConfigError::Invalid("latitude outside [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&loc.longitude_deg) {
            return Err(ConfigError::Invalid("longitude outside [-180, 180]"));
        }
        if !loc.elevation_m.is_finite() || loc.elevation_m < -500.0 {
            return Err(ConfigError::Invalid("elevation out of range"));
        }
        HorizonTable::new(self.horizons.clone())?;

        let c = &self.control;
        if c.status_check_interval_ms == 0 {
            return Err(ConfigError::Invalid("status_check_interval_ms must be > 0"));
        }
        if c.max_transition_attempts == 0 {
            return Err(ConfigError::Invalid("max_transition_attempts must be >= 1"));
        }

        let s = &self.safety;
        if s.weather_staleness_secs == 0 || s.power_staleness_secs == 0 {
            return Err(ConfigError::Invalid("staleness windows must be > 0"));
        }

        let p = &self.proxy;
        if p.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("call_timeout_ms must be > 0"));
        }
        if p.backoff_initial_ms == 0 || p.backoff_max_ms < p.backoff_initial_ms {
            return Err(ConfigError::Invalid("backoff must satisfy 0 < initial <= max"));
        }

        let r = &self.registry;
        if r.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be > 0"));
        }
        if r.default_lease_secs == 0 {
            return Err(ConfigError::Invalid("default_lease_secs must be > 0"));
        }
        Ok(())
    }
}
