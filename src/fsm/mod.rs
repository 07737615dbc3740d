//! State machine engine.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │  StateGraph (Arc, immutable, validated once)              │
//! │  ┌──────────────┬───────────────────┬────────────────┐    │
//! │  │ state        │ tags / horizon    │ (trigger→dest) │    │
//! │  ├──────────────┼───────────────────┼────────────────┤    │
//! │  │ sleeping     │ always_safe, idle │ startup→…      │    │
//! │  │ observing    │ observe, dome     │ analyze, park  │    │
//! │  │ parking      │ always_safe, park │ set_park→…     │    │
//! │  └──────────────┴───────────────────┴────────────────┘    │
//! └───────────────────────────────────────────────────────────┘
//!            ▲ shared
//!   Machine { current, interrupt flag, counters }  (one owner)
//! ```
//!
//! The machine only knows the graph. It never checks safety and never
//! talks to devices; the control loop does both before and after calling
//! [`Machine::fire`].

pub mod graph;
pub mod states;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::error::{Error, Result};

pub use graph::{GraphConfig, StateConfig, StateDef, StateGraph, StateId, StateTag, TransitionConfig};

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub struct Machine {
    graph: Arc<StateGraph>,
    current: StateId,
    interrupt: Arc<AtomicBool>,
    /// Consecutive failed attempts at the current state's actions.
    failed_attempts: u32,
    /// Total successful transitions since construction.
    transitions: u64,
}

impl Machine {
    /// New machine sitting in the graph's initial state.
    pub fn new(graph: Arc<StateGraph>) -> Self {
        let current = graph.initial();
        Self {
            graph,
            current,
            interrupt: Arc::new(AtomicBool::new(false)),
            failed_attempts: 0,
            transitions: 0,
        }
    }

    pub fn graph(&self) -> &Arc<StateGraph> {
        &self.graph
    }

    pub fn current(&self) -> StateId {
        self.current
    }

    pub fn current_def(&self) -> &StateDef {
        self.graph.state(self.current)
    }

    pub fn current_name(&self) -> &str {
        self.graph.name(self.current)
    }

    pub fn can_fire(&self, trigger: &str) -> bool {
        self.graph.target(self.current, trigger).is_some()
    }

    /// Follow the `(current, trigger)` edge. Without one the state is left
    /// untouched and `InvalidTransition` comes back.
    pub fn fire(&mut self, trigger: &str) -> Result<StateId> {
        let Some(next) = self.graph.target(self.current, trigger) else {
            warn!(
                "FSM: no '{trigger}' transition from {}",
                self.graph.name(self.current)
            );
            return Err(Error::InvalidTransition {
                state: self.current_name().to_owned(),
                trigger: trigger.to_owned(),
            });
        };

        info!(
            "FSM transition: {} -> {} [{trigger}]",
            self.graph.name(self.current),
            self.graph.name(next)
        );
        self.current = next;
        self.failed_attempts = 0;
        self.transitions += 1;
        Ok(next)
    }

    /// Back to the initial state with counters cleared. The interrupt flag
    /// is left alone.
    pub fn reset(&mut self) {
        self.current = self.graph.initial();
        self.failed_attempts = 0;
        self.transitions = 0;
    }

    pub fn is_parked(&self) -> bool {
        self.current == self.graph.parked()
    }

    // ── Interrupt ───────────────────────────────────────────────

    pub fn set_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Handle for raising the interrupt from another thread.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt)
    }

    // ── Counters ────────────────────────────────────────────────

    /// Count one failed attempt and return the running total.
    pub fn record_failure(&mut self) -> u32 {
        self.failed_attempts += 1;
        self.failed_attempts
    }

    pub fn reset_failures(&mut self) {
        self.failed_attempts = 0;
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }
}

/// A machine that several call sites may fire. `fire` still runs one at a
/// time.
#[derive(Clone)]
pub struct SharedMachine(Arc<Mutex<Machine>>);

impl SharedMachine {
    pub fn new(machine: Machine) -> Self {
        Self(Arc::new(Mutex::new(machine)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Machine> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fire(&self, trigger: &str) -> Result<StateId> {
        self.lock().fire(trigger)
    }

    pub fn can_fire(&self, trigger: &str) -> bool {
        self.lock().can_fire(trigger)
    }

    pub fn current_name(&self) -> String {
        self.lock().current_name().to_owned()
    }
}
