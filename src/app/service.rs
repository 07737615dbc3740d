//! Controller: the hexagonal core.
//!
//! [`Controller`] owns the machine, the safety evaluator, the device proxy
//! and the trigger policy. Everything outside (registry, device transport,
//! target scheduler, clock, event sink) arrives through a port, so the
//! whole loop runs against mocks in tests.
//!
//! ```text
//!  Directory ─┐                                   ┌──▶ EventSink
//!  Transport ─┼──▶ ┌──────────────────────────┐ ───┘
//!  Scheduler ─┤    │        Controller        │
//!  Clock ─────┘    │ Machine · Safety · Proxy │
//!                  └──────────────────────────┘
//! ```
//!
//! One [`tick`](Controller::tick):
//!
//! 0. refresh the sensor cache from the weather and power stations;
//! 1. interrupt set → drain to rest (park, parked, housekeeping, sleeping);
//! 2. check the current state's horizon; unsafe → `park`;
//! 3. retry unfinished device actions;
//! 4. ask the policy for a trigger, check the destination, fire;
//! 5. run the new state's device actions.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::{DateTime, Utc};
use heapless::HistoryBuffer;
use log::{error, info, warn};

use crate::clock::Clock;
use crate::config::SystemConfig;
use crate::control::{ActionPlan, NightlyPolicy, PolicyContext, TriggerPolicy};
use crate::devices::{DeviceProxy, DeviceReply, DeviceTransport};
use crate::error::{Error, Result};
use crate::fsm::{Machine, StateDef, StateGraph, StateId};
use crate::registry::Directory;
use crate::safety::{Enclosure, Horizon, HorizonTable, SafetyEvaluator, SafetyReport};
use crate::sensors::SensorCache;

use super::commands::ControlCommand;
use super::events::{ControlEvent, TransitionRecord};
use super::ports::{EventSink, Observation, TargetScheduler};

/// Transitions kept for [`Controller::history`].
pub const HISTORY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Built, not started.
    Idle,
    Running,
    /// An interrupt was seen. Stays here after draining until the next
    /// `Start`.
    Interrupted,
    /// Stopped for good: operator stop, shutdown, or a parking failure.
    Stopped,
}

/// What a tick did, so the runner can pick the next delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No transition.
    Holding,
    /// At least one transition.
    Moved,
    /// The loop is stopped.
    Halted,
}

/// Everything the controller talks to.
pub struct ControllerParts {
    pub directory: Arc<dyn Directory>,
    pub transport: Arc<dyn DeviceTransport>,
    pub scheduler: Box<dyn TargetScheduler>,
    pub clock: Arc<dyn Clock>,
}

/// Point-in-time view for operators.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub loop_state: LoopState,
    pub state: String,
    pub sun_altitude_deg: f64,
    pub last_safety: Option<SafetyReport>,
    pub failed_attempts: u32,
    /// Restarts left before the run waits for a new `Start`.
    pub run_retries: u32,
    pub transitions: u64,
    pub interrupted: bool,
    pub observation: Option<String>,
}

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

pub struct Controller {
    machine: Machine,
    safety: SafetyEvaluator,
    sensors: Arc<SensorCache>,
    proxy: DeviceProxy,
    plan: ActionPlan,
    policy: Box<dyn TriggerPolicy>,
    scheduler: Box<dyn TargetScheduler>,
    clock: Arc<dyn Clock>,
    /// Used for the "went to sleep on a good night" check.
    focus: Horizon,

    max_attempts: u32,
    status_interval: Duration,
    wait_delay: Duration,
    sensor_timeout: Duration,

    loop_state: LoopState,
    start_requested: bool,
    /// Restarts left for this night's run; refilled by `Start`.
    run_retries: u32,
    stop_pending: bool,
    draining: bool,
    /// Next action to run in the current state; `None` once all are done.
    pending_action: Option<usize>,
    observation: Option<Observation>,
    last_safety: Option<SafetyReport>,
    history: HistoryBuffer<TransitionRecord, HISTORY_LEN>,
}

impl Controller {
    /// Build and validate everything. Any configuration error is fatal.
    pub fn from_config(config: &SystemConfig, parts: ControllerParts) -> Result<Self> {
        config.validate()?;
        let horizons = HorizonTable::new(config.horizons.clone())?;
        let graph = Arc::new(StateGraph::build(&config.graph, &horizons)?);
        let call_timeout = Duration::from_millis(config.proxy.call_timeout_ms);
        let plan = ActionPlan::build(&config.actions, &config.devices, &graph, call_timeout)?;
        let policy = NightlyPolicy::new(&horizons)?;
        let focus = horizons.resolve("focus")?;

        let sensors = Arc::new(SensorCache::new());
        let safety = SafetyEvaluator::new(
            config.location,
            horizons,
            &config.safety,
            Arc::clone(&sensors),
        );
        let proxy = DeviceProxy::new(parts.directory, parts.transport, &config.proxy)
            .with_clock(Arc::clone(&parts.clock));

        info!(
            "Controller built: {} states, {} device bindings",
            graph.states().count(),
            config.devices.len()
        );

        Ok(Self {
            machine: Machine::new(graph),
            safety,
            sensors,
            proxy,
            plan,
            policy: Box::new(policy),
            scheduler: parts.scheduler,
            clock: parts.clock,
            focus,
            max_attempts: config.control.max_transition_attempts,
            status_interval: Duration::from_millis(config.control.status_check_interval_ms),
            wait_delay: Duration::from_millis(config.control.wait_delay_ms),
            sensor_timeout: call_timeout,
            loop_state: LoopState::Idle,
            start_requested: false,
            run_retries: config.control.max_transition_attempts,
            stop_pending: false,
            draining: false,
            pending_action: None,
            observation: None,
            last_safety: None,
            history: HistoryBuffer::new(),
        })
    }

    /// Replace the default nightly policy.
    pub fn with_policy(mut self, policy: Box<dyn TriggerPolicy>) -> Self {
        self.policy = policy;
        self
    }

    // ── Commands ──────────────────────────────────────────────

    pub fn handle_command(&mut self, cmd: ControlCommand, sink: &mut impl EventSink) -> Result<()> {
        match cmd {
            ControlCommand::Start => self.start(sink),
            ControlCommand::Interrupt => {
                self.interrupt();
                Ok(())
            }
            ControlCommand::Stop => self.stop(sink),
            ControlCommand::Shutdown => {
                self.shutdown(sink);
                Ok(())
            }
        }
    }

    /// Enter `Running` and ask for a start from sleeping.
    pub fn start(&mut self, sink: &mut impl EventSink) -> Result<()> {
        if self.loop_state == LoopState::Stopped || self.machine.is_interrupted() {
            warn!("Start refused in {}", self.machine.current_name());
            return Err(Error::StartRefused {
                state: self.machine.current_name().to_owned(),
            });
        }
        if self.loop_state != LoopState::Running {
            self.loop_state = LoopState::Running;
            info!("Controller running in {}", self.machine.current_name());
            sink.emit(&ControlEvent::Started {
                state: self.machine.current_name().to_owned(),
                at: self.clock.utc(),
            });
        }
        self.start_requested = true;
        self.run_retries = self.max_attempts;
        Ok(())
    }

    /// Raise the interrupt. Seen at the next tick, or after the device call
    /// in flight returns.
    pub fn interrupt(&self) {
        info!("Interrupt requested in {}", self.machine.current_name());
        self.machine.set_interrupt();
    }

    /// Only honoured while parked.
    pub fn stop(&mut self, sink: &mut impl EventSink) -> Result<()> {
        if self.loop_state == LoopState::Stopped {
            return Ok(());
        }
        if !self.machine.is_parked() {
            warn!("Stop refused in {}", self.machine.current_name());
            return Err(Error::StopRefused {
                state: self.machine.current_name().to_owned(),
            });
        }
        self.halt(sink);
        Ok(())
    }

    /// Interrupt, then stop once parked. A machine already at rest in its
    /// initial state stops at once.
    pub fn shutdown(&mut self, sink: &mut impl EventSink) {
        if self.loop_state == LoopState::Stopped {
            return;
        }
        let at_rest = self.machine.current() == self.machine.graph().initial()
            && !self.machine.is_interrupted();
        if self.machine.is_parked() || at_rest {
            self.halt(sink);
            return;
        }
        self.stop_pending = true;
        self.interrupt();
    }

    // ── Per-tick orchestration ────────────────────────────────

    pub fn tick(&mut self, sink: &mut impl EventSink) -> TickOutcome {
        if self.loop_state == LoopState::Stopped {
            return TickOutcome::Halted;
        }
        let before = self.machine.transitions();
        let now = self.clock.utc();

        self.refresh_sensors();

        if self.machine.is_interrupted() {
            self.drain(now, sink);
        } else if self.loop_state == LoopState::Running {
            self.step(now, sink);
        }

        if self.loop_state == LoopState::Stopped {
            TickOutcome::Halted
        } else if self.machine.transitions() != before {
            TickOutcome::Moved
        } else {
            TickOutcome::Holding
        }
    }

    fn refresh_sensors(&self) {
        for station in self.plan.station_handles(&self.proxy, self.sensor_timeout) {
            match station.and_then(|s| s.read()) {
                Ok(DeviceReply::Weather(w)) => self.sensors.update_weather(w),
                Ok(DeviceReply::Power(p)) => self.sensors.update_power(p),
                Ok(_) => {}
                Err(e) => warn!("SAFETY: sensor refresh failed: {e}"),
            }
        }
    }

    fn step(&mut self, now: DateTime<Utc>, sink: &mut impl EventSink) {
        // Safety of where we are.
        let current = self.machine.current_def().clone();
        if let Some(report) = self.check(&current, now) {
            let safe = report.is_safe();
            if !safe {
                warn!("SAFETY: {} unsafe: {report}", current.name);
                sink.emit(&ControlEvent::SafetyFailed {
                    state: current.name.clone(),
                    condition: report.horizon.clone(),
                    reasons: report.reasons(),
                    at: now,
                });
            }
            self.last_safety = Some(report);
            if !safe && !current.is_parking() {
                self.escalate_park(now, sink);
                return;
            }
        }

        // Unfinished actions first.
        if self.pending_action.is_some() {
            self.run_actions(now, sink);
            return;
        }

        let trigger = {
            let mut ctx = PolicyContext {
                state: self.machine.current_def(),
                now,
                safety: &self.safety,
                scheduler: self.scheduler.as_mut(),
                observation: &mut self.observation,
                start_requested: self.start_requested,
            };
            self.policy.next_trigger(&mut ctx)
        };
        let Some(trigger) = trigger else {
            return;
        };

        if self.destination_is_safe(&trigger, now, sink) {
            if self.transition(&trigger, now, sink).is_ok() {
                self.run_actions(now, sink);
            }
        } else if self.can_park() {
            self.escalate_park(now, sink);
        }
    }

    /// `None` for states without a horizon (the `always_safe` override).
    fn check(&self, state: &StateDef, now: DateTime<Utc>) -> Option<SafetyReport> {
        if state.is_always_safe() {
            return None;
        }
        let horizon = state.horizon.as_ref()?;
        let enclosure = if state.requires_dome {
            Enclosure::Open
        } else {
            Enclosure::Closed
        };
        Some(self.safety.evaluate(horizon, enclosure, now))
    }

    fn destination_is_safe(
        &self,
        trigger: &str,
        now: DateTime<Utc>,
        sink: &mut impl EventSink,
    ) -> bool {
        let graph = self.machine.graph();
        let Some(dest) = graph.target(self.machine.current(), trigger) else {
            // Left to `fire` to reject and report.
            return true;
        };
        match self.check(graph.state(dest), now) {
            Some(report) if !report.is_safe() => {
                warn!("SAFETY: not entering {}: {report}", graph.name(dest));
                sink.emit(&ControlEvent::TriggerRejected {
                    state: self.machine.current_name().to_owned(),
                    trigger: trigger.to_owned(),
                    reason: report.to_string(),
                });
                false
            }
            _ => true,
        }
    }

    fn can_park(&self) -> bool {
        let def = self.machine.current_def();
        !def.is_parking() && self.machine.can_fire(self.machine.graph().park_trigger())
    }

    /// Fire `trigger`, record it and queue the new state's actions.
    fn transition(&mut self, trigger: &str, now: DateTime<Utc>, sink: &mut impl EventSink) -> Result<StateId> {
        let from = self.machine.current_name().to_owned();
        let to = match self.machine.fire(trigger) {
            Ok(to) => to,
            Err(e) => {
                sink.emit(&ControlEvent::TriggerRejected {
                    state: from,
                    trigger: trigger.to_owned(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let record = TransitionRecord {
            from,
            to: self.machine.current_name().to_owned(),
            trigger: trigger.to_owned(),
            at: now,
        };
        sink.emit(&ControlEvent::from(&record));
        self.history.write(record);

        let entered = self.machine.current_def();
        self.policy.entered(entered);
        if entered.is_parking() {
            self.observation = None;
        }
        self.pending_action = (!self.plan.actions_for(to).is_empty()).then_some(0);

        if to == self.machine.graph().initial() {
            self.back_to_sleep(now);
        }
        Ok(to)
    }

    /// A run that ends in sleeping may restart a limited number of times.
    fn back_to_sleep(&mut self, now: DateTime<Utc>) {
        if self.safety.is_safe(&self.focus, now) {
            warn!(
                "FSM: entered {} while dark and safe at '{}'",
                self.machine.current_name(),
                self.focus.name()
            );
        }
        if !self.start_requested {
            return;
        }
        if self.run_retries > 0 {
            self.run_retries -= 1;
            info!("FSM: restarting the night's run, {} retries left", self.run_retries);
        } else {
            self.start_requested = false;
            warn!("FSM: run retries spent, sleeping until the next start");
        }
    }

    fn escalate_park(&mut self, now: DateTime<Utc>, sink: &mut impl EventSink) {
        if !self.can_park() {
            warn!(
                "FSM: {} cannot park; dropping its remaining actions",
                self.machine.current_name()
            );
            self.pending_action = None;
            return;
        }
        let park = self.machine.graph().park_trigger().to_owned();
        if self.transition(&park, now, sink).is_ok() {
            self.run_actions(now, sink);
        }
    }

    /// Run pending actions; a failure counts one attempt.
    fn run_actions(&mut self, now: DateTime<Utc>, sink: &mut impl EventSink) {
        if let Err((device, e)) = self.run_pending(true) {
            self.action_failed(device, e, now, sink);
        }
    }

    /// Run actions from the pending index. Stops at the first failure, or
    /// after any call that returns with the interrupt raised when
    /// `yield_to_interrupt` is set.
    fn run_pending(&mut self, yield_to_interrupt: bool) -> core::result::Result<(), (String, Error)> {
        let state = self.machine.current();
        let Some(mut index) = self.pending_action else {
            return Ok(());
        };

        while let Some(action) = self.plan.actions_for(state).get(index) {
            let result = action.execute(&self.proxy, self.observation.as_ref());
            if let Err(e) = result {
                return Err((action.device().to_owned(), e));
            }
            index += 1;
            self.pending_action = Some(index);
            if yield_to_interrupt && self.machine.is_interrupted() {
                info!("FSM: interrupt seen after device call");
                return Ok(());
            }
        }

        self.pending_action = None;
        self.machine.reset_failures();
        Ok(())
    }

    fn action_failed(&mut self, device: String, error: Error, now: DateTime<Utc>, sink: &mut impl EventSink) {
        let attempt = self.machine.record_failure();
        let state = self.machine.current_name().to_owned();
        warn!(
            "FSM: {state}/{device} failed (attempt {attempt}/{}): {error}",
            self.max_attempts
        );
        sink.emit(&ControlEvent::DeviceFailed {
            state: state.clone(),
            device,
            error,
            attempt,
        });

        if attempt < self.max_attempts {
            return;
        }
        if self.machine.current_def().is_parking() {
            error!("PARKING FAILED in {state} after {attempt} attempts");
            sink.emit(&ControlEvent::ParkingFailed {
                state,
                attempts: attempt,
            });
            self.halt(sink);
        } else {
            self.escalate_park(now, sink);
        }
    }

    // ── Interrupt drain ───────────────────────────────────────

    fn drain(&mut self, now: DateTime<Utc>, sink: &mut impl EventSink) {
        if !self.draining {
            self.draining = true;
            self.start_requested = false;
            if self.loop_state != LoopState::Idle {
                self.loop_state = LoopState::Interrupted;
            }
            info!("FSM: interrupt in {}, draining", self.machine.current_name());
            sink.emit(&ControlEvent::Interrupted {
                state: self.machine.current_name().to_owned(),
            });
        }

        let graph = Arc::clone(self.machine.graph());
        let bound = graph.states().count() * 2;
        for _ in 0..bound {
            if !self.finish_drain_actions(now, sink) {
                return;
            }
            if self.machine.is_parked() && self.stop_pending {
                self.halt(sink);
                return;
            }
            if self.machine.current() == graph.initial() {
                self.machine.clear_interrupt();
                self.draining = false;
                info!("FSM: drained, resting in {}", self.machine.current_name());
                if self.stop_pending {
                    self.halt(sink);
                }
                return;
            }

            let Some(trigger) = drain_trigger(&graph, self.machine.current()) else {
                error!("FSM: no route to rest from {}", self.machine.current_name());
                return;
            };
            if self.transition(&trigger, now, sink).is_err() {
                return;
            }
        }
    }

    /// Settle the current state's actions before the drain moves on.
    /// Parking actions must succeed: a failure holds the drain until the
    /// next tick and counts toward `ParkingFailed`. Housekeeping failures
    /// are reported and skipped. An active state's leftovers are dropped.
    /// `false` means stay in this state for now.
    fn finish_drain_actions(&mut self, now: DateTime<Utc>, sink: &mut impl EventSink) -> bool {
        if self.pending_action.is_none() {
            return true;
        }
        let def = self.machine.current_def();
        if def.is_parking() {
            if let Err((device, error)) = self.run_pending(false) {
                self.action_failed(device, error, now, sink);
                return false;
            }
        } else if def.is_idle() {
            if let Err((device, error)) = self.run_pending(false) {
                warn!("FSM: {device} failed while draining: {error}");
                sink.emit(&ControlEvent::DeviceFailed {
                    state: self.machine.current_name().to_owned(),
                    device,
                    error,
                    attempt: 1,
                });
            }
        }
        self.pending_action = None;
        true
    }

    fn halt(&mut self, sink: &mut impl EventSink) {
        self.loop_state = LoopState::Stopped;
        self.stop_pending = false;
        info!("Controller stopped in {}", self.machine.current_name());
        sink.emit(&ControlEvent::Stopped {
            state: self.machine.current_name().to_owned(),
        });
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            loop_state: self.loop_state,
            state: self.machine.current_name().to_owned(),
            sun_altitude_deg: self.safety.current_sun_altitude(self.clock.utc()),
            last_safety: self.last_safety.clone(),
            failed_attempts: self.machine.failed_attempts(),
            run_retries: self.run_retries,
            transitions: self.machine.transitions(),
            interrupted: self.machine.is_interrupted(),
            observation: self.observation.as_ref().map(|o| o.name.clone()),
        }
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.history.oldest_ordered().cloned().collect()
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn sensors(&self) -> &Arc<SensorCache> {
        &self.sensors
    }

    pub fn safety(&self) -> &SafetyEvaluator {
        &self.safety
    }

    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.machine.interrupt_flag()
    }

    pub fn status_interval(&self) -> Duration {
        self.status_interval
    }

    pub fn wait_delay(&self) -> Duration {
        self.wait_delay
    }
}

/// Next step toward rest: park from active states, finish parking, then
/// go through an idle state (housekeeping) on the way to the initial state.
fn drain_trigger(graph: &StateGraph, current: StateId) -> Option<String> {
    let def = graph.state(current);
    if !def.is_parking() && !def.is_idle() {
        return Some(graph.park_trigger().to_owned());
    }
    if def.is_parking() && current != graph.parked() {
        return graph.path_to(current, graph.parked())?.into_iter().next();
    }
    if current == graph.parked() {
        let via_idle = graph
            .transitions_from(current)
            .find(|(_, dest)| graph.state(*dest).is_idle() && *dest != graph.initial())
            .map(|(trigger, _)| trigger.to_owned());
        if via_idle.is_some() {
            return via_idle;
        }
    }
    graph.path_to(current, graph.initial())?.into_iter().next()
}
