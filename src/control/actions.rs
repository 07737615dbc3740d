//! Per-state device actions.
//!
//! Each state may list device actions that run once when the state is
//! entered. The list is validated against the graph and the device
//! bindings at startup, so a typo in a role or a command sent to the wrong
//! kind of device never reaches the wire.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::app::ports::Observation;
use crate::devices::{
    Camera, CameraCommand, DeviceBinding, DeviceCommand, DeviceKind, DeviceProxy, DomeCommand,
    FrameType, Mount, MountCommand, SensorStation,
};
use crate::error::{ConfigError, Error, Result};
use crate::fsm::states::names;
use crate::fsm::{StateGraph, StateId};

/// What an action does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStep {
    /// Send a fixed command.
    Command(DeviceCommand),
    /// Slew the mount to the current observation.
    SlewToTarget,
    /// Expose a light frame for the current observation.
    ExposeTarget,
}

impl ActionStep {
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Command(c) => c.operation(),
            Self::SlewToTarget => "slew_to",
            Self::ExposeTarget => "expose",
        }
    }

    fn supported_by(&self, kind: DeviceKind) -> bool {
        match self {
            Self::Command(c) => c.supported_by(kind),
            Self::SlewToTarget => kind == DeviceKind::Mount,
            Self::ExposeTarget => kind == DeviceKind::Camera,
        }
    }
}

/// One configured action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    pub state: String,
    /// Device role, matching a [`DeviceBinding::role`].
    pub device: String,
    pub step: ActionStep,
    /// Overrides the proxy's default call timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A validated action, bound to its device.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub binding: DeviceBinding,
    pub step: ActionStep,
    pub timeout: Duration,
}

impl PlannedAction {
    pub fn device(&self) -> &str {
        &self.binding.role
    }

    /// Run the action. Target steps need `observation`.
    pub fn execute(&self, proxy: &DeviceProxy, observation: Option<&Observation>) -> Result<()> {
        debug!("ACTION: {}.{}", self.binding.role, self.step.operation());
        match &self.step {
            ActionStep::Command(command) => proxy
                .invoke_binding(&self.binding, command, self.timeout)
                .map(|_| ()),
            ActionStep::SlewToTarget => {
                let target = observation.ok_or(Error::NoTarget { action: "slew_to" })?;
                Mount::new(proxy, &self.binding, self.timeout)?.slew_to(target.ra_deg, target.dec_deg)
            }
            ActionStep::ExposeTarget => {
                let target = observation.ok_or(Error::NoTarget { action: "expose" })?;
                // The call has to outlast the exposure itself.
                let timeout = self.timeout
                    + Duration::try_from_secs_f32(target.exposure_secs).unwrap_or(Duration::ZERO);
                let frame = Camera::new(proxy, &self.binding, timeout)?
                    .expose(target.exposure_secs, FrameType::Light)?;
                debug!("ACTION: {} frame {frame} for {}", self.binding.role, target.name);
                Ok(())
            }
        }
    }
}

/// Actions per state, in configured order.
#[derive(Debug, Default)]
pub struct ActionPlan {
    by_state: HashMap<StateId, Vec<PlannedAction>>,
    /// Weather and power stations polled every tick.
    stations: Vec<DeviceBinding>,
}

impl ActionPlan {
    pub fn build(
        actions: &[ActionConfig],
        bindings: &[DeviceBinding],
        graph: &StateGraph,
        default_timeout: Duration,
    ) -> core::result::Result<Self, ConfigError> {
        let mut roles: HashMap<&str, &DeviceBinding> = HashMap::new();
        for b in bindings {
            if roles.insert(b.role.as_str(), b).is_some() {
                return Err(ConfigError::DuplicateDevice(b.role.clone()));
            }
        }

        let mut by_state: HashMap<StateId, Vec<PlannedAction>> = HashMap::new();
        for a in actions {
            let state = graph
                .id_of(&a.state)
                .ok_or_else(|| ConfigError::UnknownState(a.state.clone()))?;
            let binding = roles
                .get(a.device.as_str())
                .ok_or_else(|| ConfigError::UnknownDevice(a.device.clone()))?;
            if !a.step.supported_by(binding.kind) {
                return Err(ConfigError::UnsupportedOperation {
                    device: a.device.clone(),
                    operation: a.step.operation(),
                });
            }
            by_state.entry(state).or_default().push(PlannedAction {
                binding: (*binding).clone(),
                step: a.step.clone(),
                timeout: a.timeout_ms.map_or(default_timeout, Duration::from_millis),
            });
        }

        let stations = bindings
            .iter()
            .filter(|b| matches!(b.kind, DeviceKind::Weather | DeviceKind::Power))
            .cloned()
            .collect();

        Ok(Self { by_state, stations })
    }

    pub fn actions_for(&self, state: StateId) -> &[PlannedAction] {
        self.by_state.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn stations(&self) -> &[DeviceBinding] {
        &self.stations
    }

    /// Sensor handles for this tick's refresh.
    pub fn station_handles<'a>(
        &'a self,
        proxy: &'a DeviceProxy,
        timeout: Duration,
    ) -> impl Iterator<Item = Result<SensorStation<'a>>> + 'a {
        self.stations
            .iter()
            .map(move |b| SensorStation::new(proxy, b, timeout))
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub fn default_bindings() -> Vec<DeviceBinding> {
    vec![
        DeviceBinding::new("camera0", "huntsman.cam0", DeviceKind::Camera),
        DeviceBinding::new("mount", "huntsman.mount", DeviceKind::Mount),
        DeviceBinding::new("dome", "huntsman.dome", DeviceKind::Dome),
        DeviceBinding::new("weather", "huntsman.weather", DeviceKind::Weather),
        DeviceBinding::new("power", "huntsman.power", DeviceKind::Power),
    ]
}

fn action(state: &str, device: &str, step: ActionStep) -> ActionConfig {
    ActionConfig {
        state: state.to_owned(),
        device: device.to_owned(),
        step,
        timeout_ms: None,
    }
}

fn camera(c: CameraCommand) -> ActionStep {
    ActionStep::Command(DeviceCommand::Camera(c))
}

fn mount(m: MountCommand) -> ActionStep {
    ActionStep::Command(DeviceCommand::Mount(m))
}

fn dome(d: DomeCommand) -> ActionStep {
    ActionStep::Command(DeviceCommand::Dome(d))
}

/// Actions for the default graph and bindings.
pub fn default_actions() -> Vec<ActionConfig> {
    use names::*;

    let expose = |seconds, frame| camera(CameraCommand::Expose { seconds, frame });
    vec![
        action(STARTING, "camera0", camera(CameraCommand::SetCooling { enabled: true })),
        action(STARTING, "mount", mount(MountCommand::Unpark)),
        action(TAKING_DARKS, "camera0", expose(0.0, FrameType::Bias)),
        action(TAKING_DARKS, "camera0", expose(60.0, FrameType::Dark)),
        action(COARSE_FOCUSING, "dome", dome(DomeCommand::Open)),
        ActionConfig {
            timeout_ms: Some(600_000),
            ..action(COARSE_FOCUSING, "camera0", camera(CameraCommand::Autofocus { coarse: true }))
        },
        action(TWILIGHT_FLAT_FIELDING, "dome", dome(DomeCommand::Open)),
        action(TWILIGHT_FLAT_FIELDING, "camera0", expose(1.0, FrameType::Flat)),
        action(OBSERVING, "dome", dome(DomeCommand::Open)),
        action(OBSERVING, "mount", ActionStep::SlewToTarget),
        action(OBSERVING, "camera0", ActionStep::ExposeTarget),
        action(PARKING, "dome", dome(DomeCommand::Close)),
        action(PARKING, "mount", mount(MountCommand::SlewToHome)),
        action(PARKING, "mount", mount(MountCommand::Park)),
        action(HOUSEKEEPING, "camera0", camera(CameraCommand::SetCooling { enabled: false })),
        action(HOUSEKEEPING, "dome", dome(DomeCommand::Park)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::states::default_graph_config;
    use crate::safety::{HorizonTable, default_horizons};

    fn graph() -> StateGraph {
        StateGraph::build(
            &default_graph_config(),
            &HorizonTable::new(default_horizons()).unwrap(),
        )
        .unwrap()
    }

    const T: Duration = Duration::from_secs(30);

    #[test]
    fn defaults_build() {
        let g = graph();
        let plan = ActionPlan::build(&default_actions(), &default_bindings(), &g, T).unwrap();
        let parking = plan.actions_for(g.id_of(names::PARKING).unwrap());
        assert_eq!(parking.len(), 3);
        assert_eq!(parking[0].device(), "dome");
        assert!(plan.actions_for(g.id_of(names::SLEEPING).unwrap()).is_empty());
        assert_eq!(plan.stations().len(), 2);
    }

    #[test]
    fn explicit_timeout_overrides_default() {
        let g = graph();
        let plan = ActionPlan::build(&default_actions(), &default_bindings(), &g, T).unwrap();
        let focus = plan.actions_for(g.id_of(names::COARSE_FOCUSING).unwrap());
        assert_eq!(focus[0].timeout, T);
        assert_eq!(focus[1].timeout, Duration::from_secs(600));
    }

    #[test]
    fn unknown_role_rejected() {
        let actions = vec![action(names::PARKING, "telescope", mount(MountCommand::Park))];
        assert_eq!(
            ActionPlan::build(&actions, &default_bindings(), &graph(), T).unwrap_err(),
            ConfigError::UnknownDevice("telescope".into())
        );
    }

    #[test]
    fn unknown_state_rejected() {
        let actions = vec![action("pointing", "mount", mount(MountCommand::Park))];
        assert_eq!(
            ActionPlan::build(&actions, &default_bindings(), &graph(), T).unwrap_err(),
            ConfigError::UnknownState("pointing".into())
        );
    }

    #[test]
    fn command_for_wrong_kind_rejected() {
        let actions = vec![action(names::PARKING, "dome", mount(MountCommand::Park))];
        assert_eq!(
            ActionPlan::build(&actions, &default_bindings(), &graph(), T).unwrap_err(),
            ConfigError::UnsupportedOperation {
                device: "dome".into(),
                operation: "park"
            }
        );

        let actions = vec![action(names::OBSERVING, "dome", ActionStep::ExposeTarget)];
        assert!(matches!(
            ActionPlan::build(&actions, &default_bindings(), &graph(), T),
            Err(ConfigError::UnsupportedOperation { operation: "expose", .. })
        ));
    }

    #[test]
    fn duplicate_role_rejected() {
        let mut bindings = default_bindings();
        bindings.push(DeviceBinding::new("dome", "other.dome", DeviceKind::Dome));
        assert_eq!(
            ActionPlan::build(&[], &bindings, &graph(), T).unwrap_err(),
            ConfigError::DuplicateDevice("dome".into())
        );
    }

    #[test]
    fn action_json_shape() {
        let json = r#"{"state":"parking","device":"mount","step":{"command":{"mount":"park"}}}"#;
        let a: ActionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(a, action(names::PARKING, "mount", mount(MountCommand::Park)));

        let json = r#"{"state":"observing","device":"mount","step":"slew_to_target"}"#;
        let a: ActionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(a.step, ActionStep::SlewToTarget);
    }
}
