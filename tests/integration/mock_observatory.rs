//! Mock observatory for integration tests.
//!
//! One [`MockObservatory`] stands in for every device: it implements
//! [`DeviceTransport`], records each call, and answers from a small script
//! (weather on or off, failing operations). Services are registered in an
//! in-process [`Registry`] under addresses whose host is the service name,
//! so the transport can tell them apart without sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use nightwatch::app::{
    ControlEvent, Controller, ControllerParts, EventSink, Observation, TargetScheduler,
};
use nightwatch::clock::{Clock, ManualClock};
use nightwatch::config::SystemConfig;
use nightwatch::control::actions::default_bindings;
use nightwatch::devices::{CameraCommand, DeviceCommand, DeviceKind, DeviceReply, DeviceTransport};
use nightwatch::error::DeviceFailure;
use nightwatch::registry::{Metadata, Registry, ServiceAddress};
use nightwatch::sensors::{PowerReading, WeatherReading};

/// 23:00 local at Siding Spring, sun far below every horizon.
pub fn night() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 4, 29, 13, 0, 0).unwrap()
}

/// Local noon.
pub fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 4, 29, 2, 0, 0).unwrap()
}

// ── Device call record ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCall {
    pub service: String,
    pub operation: &'static str,
}

struct FailRule {
    service: String,
    operation: &'static str,
    /// `None` fails forever.
    remaining: Option<u32>,
}

// ── MockObservatory ───────────────────────────────────────────

pub struct MockObservatory {
    clock: Arc<ManualClock>,
    kinds: HashMap<String, DeviceKind>,
    raining: AtomicBool,
    cloudy: AtomicBool,
    /// Raised when the named operation is called.
    trip: Mutex<Option<(&'static str, Arc<AtomicBool>)>>,
    frames: AtomicU64,
    calls: Mutex<Vec<DeviceCall>>,
    failures: Mutex<Vec<FailRule>>,
}

#[allow(dead_code)]
impl MockObservatory {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            kinds: default_bindings()
                .into_iter()
                .map(|b| (b.service, b.kind))
                .collect(),
            raining: AtomicBool::new(false),
            cloudy: AtomicBool::new(false),
            trip: Mutex::new(None),
            frames: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn set_raining(&self, raining: bool) {
        self.raining.store(raining, Ordering::SeqCst);
    }

    /// Soft weather fault only: the dome may not open but the
    /// interlocks hold.
    pub fn set_cloudy(&self, cloudy: bool) {
        self.cloudy.store(cloudy, Ordering::SeqCst);
    }

    /// Raise `flag` while `operation` is in flight.
    pub fn interrupt_on(&self, operation: &'static str, flag: Arc<AtomicBool>) {
        *self.trip.lock().unwrap() = Some((operation, flag));
    }

    /// Fail `service.operation` the next `times` calls.
    pub fn fail(&self, service: &str, operation: &'static str, times: u32) {
        self.push_rule(service, operation, Some(times));
    }

    pub fn fail_always(&self, service: &str, operation: &'static str) {
        self.push_rule(service, operation, None);
    }

    fn push_rule(&self, service: &str, operation: &'static str, remaining: Option<u32>) {
        self.failures.lock().unwrap().push(FailRule {
            service: service.to_owned(),
            operation,
            remaining,
        });
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than sensor polling.
    pub fn actions(&self) -> Vec<(String, &'static str)> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation != "get_reading")
            .map(|c| (c.service, c.operation))
            .collect()
    }

    pub fn count(&self, service: &str, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.service == service && c.operation == operation)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn should_fail(&self, service: &str, operation: &str) -> bool {
        let mut rules = self.failures.lock().unwrap();
        for rule in rules.iter_mut() {
            if rule.service == service && rule.operation == operation {
                match &mut rule.remaining {
                    None => return true,
                    Some(0) => {}
                    Some(n) => {
                        *n -= 1;
                        return true;
                    }
                }
            }
        }
        false
    }
}

impl DeviceTransport for MockObservatory {
    fn call(
        &self,
        address: &ServiceAddress,
        command: &DeviceCommand,
        _timeout: Duration,
    ) -> Result<DeviceReply, DeviceFailure> {
        let service = address.host.clone();
        let operation = command.operation();
        self.calls.lock().unwrap().push(DeviceCall {
            service: service.clone(),
            operation,
        });

        if let Some((op, flag)) = self.trip.lock().unwrap().as_ref() {
            if *op == operation {
                flag.store(true, Ordering::SeqCst);
            }
        }

        if self.should_fail(&service, operation) {
            return Err(DeviceFailure::Remote(format!("{operation} failed")));
        }

        let now = self.clock.utc();
        Ok(match command {
            DeviceCommand::Sensor(_) => match self.kinds.get(&service) {
                Some(DeviceKind::Weather) => {
                    let mut w = WeatherReading::clear(now);
                    if self.raining.load(Ordering::SeqCst) {
                        w.is_raining = true;
                        w.is_wet = true;
                    }
                    w.is_cloudy = self.cloudy.load(Ordering::SeqCst);
                    DeviceReply::Weather(w)
                }
                _ => DeviceReply::Power(PowerReading::nominal(now)),
            },
            DeviceCommand::Camera(CameraCommand::Expose { .. }) => DeviceReply::Exposure {
                frame_id: self.frames.fetch_add(1, Ordering::SeqCst) + 1,
            },
            _ => DeviceReply::Done,
        })
    }
}

// ── Recording sink ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<ControlEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn transitions(&self) -> Vec<(String, String)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ControlEvent::Transition { from, to, .. } => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn has(&self, pred: impl Fn(&ControlEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &ControlEvent) {
        self.events.push(event.clone());
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// Offers the same target every time.
pub struct OneTarget;

impl TargetScheduler for OneTarget {
    fn next_observation(&mut self, _now: DateTime<Utc>) -> Option<Observation> {
        Some(Observation {
            name: "NGC 300".into(),
            ra_deg: 13.72,
            dec_deg: -37.68,
            exposure_secs: 30.0,
        })
    }

    fn observation_complete(&mut self, _observation: &Observation) {}
}

// ── Harness ───────────────────────────────────────────────────

pub struct Harness {
    pub controller: Controller,
    pub sink: RecordingSink,
    pub clock: Arc<ManualClock>,
    pub devices: Arc<MockObservatory>,
    pub registry: Arc<Registry>,
}

/// Short resolve deadline so a missing service fails fast.
pub fn test_config() -> SystemConfig {
    let mut config = SystemConfig::default();
    config.proxy.resolve_timeout_ms = 20;
    config.proxy.backoff_initial_ms = 5;
    config.proxy.backoff_max_ms = 10;
    config
}

#[allow(dead_code)]
impl Harness {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self::with_config(start, &test_config())
    }

    pub fn with_config(start: DateTime<Utc>, config: &SystemConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let registry = Arc::new(Registry::new(clock.clone()));
        for binding in &config.devices {
            registry
                .register(
                    &binding.service,
                    ServiceAddress::new(binding.service.clone(), 1),
                    Metadata::new(),
                    86_400,
                )
                .unwrap();
        }
        let devices = Arc::new(MockObservatory::new(Arc::clone(&clock)));
        let controller = Controller::from_config(
            config,
            ControllerParts {
                directory: registry.clone(),
                transport: devices.clone(),
                scheduler: Box::new(OneTarget),
                clock: clock.clone(),
            },
        )
        .unwrap();
        Self {
            controller,
            sink: RecordingSink::default(),
            clock,
            devices,
            registry,
        }
    }

    pub fn tick(&mut self) -> nightwatch::app::TickOutcome {
        self.controller.tick(&mut self.sink)
    }

    pub fn start(&mut self) {
        self.controller.start(&mut self.sink).unwrap();
    }

    pub fn state(&self) -> &str {
        self.controller.machine().current_name()
    }

    /// Tick until `state` is reached, at most `limit` ticks.
    pub fn tick_until(&mut self, state: &str, limit: usize) -> bool {
        for _ in 0..limit {
            if self.state() == state {
                return true;
            }
            self.tick();
        }
        self.state() == state
    }
}
