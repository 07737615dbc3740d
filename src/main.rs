//! Nightwatch: Main Entry Point
//!
//! Runs the full stack on one host with simulated devices.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  JsonConfigFile   LogEventSink   Sim devices   TargetList      │
//! │  (ConfigPort)     (EventSink)    (DeviceServer) (Scheduler)    │
//! │  RegistryServer ◀── RegistryClient (Directory)                 │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Controller (control thread)               │    │
//! │  │  FSM · Safety · Device proxy · Policy                  │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `NIGHTWATCH_CONFIG` names the JSON config (default `nightwatch.json`);
//! a missing file means built-in defaults.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use nightwatch::adapters::config_file::JsonConfigFile;
use nightwatch::adapters::log_sink::LogEventSink;
use nightwatch::adapters::sim::{SkyControl, TargetList, demo_targets, simulator_for};
use nightwatch::app::{ConfigPort, Controller, ControllerParts, spawn};
use nightwatch::clock::{Clock, SystemClock};
use nightwatch::config::SystemConfig;
use nightwatch::devices::{DeviceServer, TcpDeviceTransport};
use nightwatch::error::ConfigError;
use nightwatch::registry::{Directory, Registry, RegistryClient, RegistryServer};

const CONFIG_ENV: &str = "NIGHTWATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "nightwatch.json";

fn load_config() -> Result<SystemConfig> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let port = JsonConfigFile::new(&path);
    match port.load() {
        Ok(cfg) => Ok(cfg),
        Err(ConfigError::NotFound) => {
            warn!("No config at {path}, using defaults");
            Ok(SystemConfig::default())
        }
        // Anything else is an operator error; refuse to start.
        Err(e) => Err(anyhow!("config {path}: {e}")),
    }
}

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("╔══════════════════════════════════════╗");
    info!("║  Nightwatch v{}                       ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Config ─────────────────────────────────────────────
    let config = load_config()?;
    config.validate().context("invalid config")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // ── 3. Registry daemon + client ───────────────────────────
    let reg = &config.registry;
    let mut registry_server = RegistryServer::start(
        &format!("{}:{}", reg.host, reg.port),
        Arc::new(Registry::new(Arc::clone(&clock))),
        Duration::from_secs(reg.sweep_interval_secs),
    )
    .context("starting registry")?;
    let directory: Arc<dyn Directory> = Arc::new(RegistryClient::new(
        reg.host.clone(),
        registry_server.local_addr().port(),
        Duration::from_millis(reg.client_timeout_ms),
    ));

    // ── 4. Simulated devices ──────────────────────────────────
    let sky = SkyControl::default();
    let mut devices = Vec::with_capacity(config.devices.len());
    for binding in &config.devices {
        let server = DeviceServer::start(
            &binding.service,
            simulator_for(binding.kind, &clock, &sky),
            &format!("{}:0", reg.host),
            &reg.host,
            Arc::clone(&directory),
            reg.default_lease_secs,
        )
        .with_context(|| format!("starting device {}", binding.service))?;
        devices.push(server);
    }

    // ── 5. Controller ─────────────────────────────────────────
    let controller = Controller::from_config(
        &config,
        ControllerParts {
            directory,
            transport: Arc::new(TcpDeviceTransport),
            scheduler: Box::new(TargetList::new(demo_targets())),
            clock,
        },
    )
    .context("building controller")?;

    let (handle, control_thread) =
        spawn(controller, LogEventSink::new()).context("spawning control thread")?;
    handle.start();

    // ── 6. Run, then shut down through the park path ──────────
    if config.run_secs > 0 {
        thread::sleep(Duration::from_secs(config.run_secs));
        info!("Run time elapsed, shutting down");
        handle.shutdown();
    }

    let controller = control_thread
        .join()
        .map_err(|_| anyhow!("control thread panicked"))?;
    let status = controller.status();
    info!(
        "Final state {} after {} transitions (sun {:.1}°)",
        status.state, status.transitions, status.sun_altitude_deg
    );
    for t in controller.history() {
        info!("  {} {} -> {} [{}]", t.at.format("%H:%M:%S"), t.from, t.to, t.trigger);
    }

    // ── 7. Teardown ───────────────────────────────────────────
    for server in devices {
        server.shutdown();
    }
    registry_server.shutdown();
    Ok(())
}
