//! Control decisions that sit on top of the state machine: which trigger
//! to fire next, and which device actions each state runs.

pub mod actions;
pub mod policy;

pub use actions::{ActionConfig, ActionPlan, ActionStep, PlannedAction};
pub use policy::{NightlyPolicy, PolicyContext, TriggerPolicy};
