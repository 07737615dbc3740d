//! Validated, immutable state graph.
//!
//! Built once at startup from a [`GraphConfig`]; every structural mistake
//! is a [`ConfigError`] before the control loop ever runs. After
//! construction the graph is only read, so it is shared as
//! `Arc<StateGraph>`.

use std::collections::{HashMap, HashSet, VecDeque};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::safety::{Horizon, HorizonTable};

// ---------------------------------------------------------------------------
// Configuration shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateConfig {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Horizon that must be dark (and safe) to remain in this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizon: Option<String>,
    /// Whether the state has the dome open.
    #[serde(default)]
    pub requires_dome: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    pub trigger: String,
    pub source: Vec<String>,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub initial: String,
    pub parked: String,
    pub park_trigger: String,
    pub states: Vec<StateConfig>,
    pub transitions: Vec<TransitionConfig>,
}

// ---------------------------------------------------------------------------
// Tags
// ---------------------------------------------------------------------------

/// Tag bits. Stored as a mask on each state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StateTag {
    /// Skips the horizon check entirely.
    AlwaysSafe = 0b0001,
    /// Member of the parking family; never sent `park`.
    Parking = 0b0010,
    /// Quiescent; exempt from the universal park edge.
    Idle = 0b0100,
    /// Allowed to have no outgoing transition.
    Terminal = 0b1000,
}

impl StateTag {
    pub const fn mask(self) -> u8 {
        self as u8
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "always_safe" => Some(Self::AlwaysSafe),
            "parking" => Some(Self::Parking),
            "idle" => Some(Self::Idle),
            "terminal" => Some(Self::Terminal),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(usize);

impl StateId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct StateDef {
    pub id: StateId,
    pub name: String,
    tags: u8,
    pub horizon: Option<Horizon>,
    pub requires_dome: bool,
}

impl StateDef {
    pub fn has(&self, tag: StateTag) -> bool {
        self.tags & tag.mask() != 0
    }

    pub fn is_always_safe(&self) -> bool {
        self.has(StateTag::AlwaysSafe)
    }

    pub fn is_parking(&self) -> bool {
        self.has(StateTag::Parking)
    }

    pub fn is_idle(&self) -> bool {
        self.has(StateTag::Idle)
    }
}

#[derive(Debug, Clone)]
struct Edge {
    trigger: String,
    dest: StateId,
}

#[derive(Debug)]
pub struct StateGraph {
    states: Vec<StateDef>,
    by_name: HashMap<String, StateId>,
    outgoing: Vec<Vec<Edge>>,
    initial: StateId,
    parked: StateId,
    park_trigger: String,
}

impl StateGraph {
    pub fn build(config: &GraphConfig, horizons: &HorizonTable) -> Result<Self, ConfigError> {
        // States
        let mut states = Vec::with_capacity(config.states.len());
        let mut by_name = HashMap::new();
        for (i, sc) in config.states.iter().enumerate() {
            let id = StateId(i);
            if by_name.insert(sc.name.clone(), id).is_some() {
                return Err(ConfigError::DuplicateState(sc.name.clone()));
            }

            let mut tags = 0u8;
            for t in &sc.tags {
                let tag = StateTag::parse(t).ok_or_else(|| ConfigError::UnknownTag {
                    state: sc.name.clone(),
                    tag: t.clone(),
                })?;
                tags |= tag.mask();
            }

            let horizon = sc
                .horizon
                .as_deref()
                .map(|h| horizons.resolve(h))
                .transpose()?;
            if horizon.is_none() && tags & StateTag::AlwaysSafe.mask() == 0 {
                return Err(ConfigError::MissingHorizon(sc.name.clone()));
            }
            if sc.requires_dome && tags & StateTag::AlwaysSafe.mask() != 0 {
                warn!("FSM: '{}' opens the dome but is always_safe; weather will not park it", sc.name);
            }

            states.push(StateDef {
                id,
                name: sc.name.clone(),
                tags,
                horizon,
                requires_dome: sc.requires_dome,
            });
        }

        let lookup = |name: &str| {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| ConfigError::UnknownState(name.to_owned()))
        };
        let initial = lookup(&config.initial)?;
        let parked = lookup(&config.parked)?;

        // Transitions
        let mut outgoing: Vec<Vec<Edge>> = vec![Vec::new(); states.len()];
        for tc in &config.transitions {
            if tc.source.is_empty() {
                return Err(ConfigError::Invalid("transition without source states"));
            }
            let dest = lookup(&tc.dest)?;
            for src in &tc.source {
                let src = lookup(src)?;
                let edges = &mut outgoing[src.0];
                if edges.iter().any(|e| e.trigger == tc.trigger) {
                    return Err(ConfigError::AmbiguousTransition {
                        state: states[src.0].name.clone(),
                        trigger: tc.trigger.clone(),
                    });
                }
                edges.push(Edge {
                    trigger: tc.trigger.clone(),
                    dest,
                });
            }
        }

        let graph = Self {
            states,
            by_name,
            outgoing,
            initial,
            parked,
            park_trigger: config.park_trigger.clone(),
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let reachable = self.reachable_from(self.initial);
        for s in &self.states {
            if !reachable.contains(&s.id) {
                return Err(ConfigError::UnreachableState(s.name.clone()));
            }
            if self.outgoing[s.id.0].is_empty() && !s.has(StateTag::Terminal) {
                return Err(ConfigError::OrphanState(s.name.clone()));
            }
            if !s.is_parking() && !s.is_idle() {
                let parks_into_family = self
                    .target(s.id, &self.park_trigger)
                    .is_some_and(|d| self.states[d.0].is_parking());
                if !parks_into_family {
                    return Err(ConfigError::MissingParkTransition(s.name.clone()));
                }
            }
            if s.id != self.parked
                && !s.has(StateTag::Terminal)
                && self.path_to(s.id, self.parked).is_none()
            {
                return Err(ConfigError::NoPathToParked(s.name.clone()));
            }
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn state(&self, id: StateId) -> &StateDef {
        &self.states[id.0]
    }

    pub fn states(&self) -> impl Iterator<Item = &StateDef> {
        self.states.iter()
    }

    pub fn id_of(&self, name: &str) -> Option<StateId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: StateId) -> &str {
        &self.states[id.0].name
    }

    pub fn initial(&self) -> StateId {
        self.initial
    }

    pub fn parked(&self) -> StateId {
        self.parked
    }

    pub fn park_trigger(&self) -> &str {
        &self.park_trigger
    }

    /// Destination of `trigger` from `from`, if such an edge exists.
    pub fn target(&self, from: StateId, trigger: &str) -> Option<StateId> {
        self.outgoing[from.0]
            .iter()
            .find(|e| e.trigger == trigger)
            .map(|e| e.dest)
    }

    /// `(trigger, destination)` pairs leaving `from`.
    pub fn transitions_from(&self, from: StateId) -> impl Iterator<Item = (&str, StateId)> {
        self.outgoing[from.0]
            .iter()
            .map(|e| (e.trigger.as_str(), e.dest))
    }

    pub fn reachable_from(&self, from: StateId) -> HashSet<StateId> {
        let mut seen = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        while let Some(s) = queue.pop_front() {
            for e in &self.outgoing[s.0] {
                if seen.insert(e.dest) {
                    queue.push_back(e.dest);
                }
            }
        }
        seen
    }

    /// Shortest trigger sequence from `from` to `to` (BFS). Empty when
    /// `from == to`.
    pub fn path_to(&self, from: StateId, to: StateId) -> Option<Vec<String>> {
        let mut prev: HashMap<StateId, (StateId, &str)> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        let mut seen = HashSet::from([from]);

        while let Some(s) = queue.pop_front() {
            if s == to {
                let mut path = Vec::new();
                let mut cur = to;
                while cur != from {
                    let (p, trigger) = prev[&cur];
                    path.push(trigger.to_owned());
                    cur = p;
                }
                path.reverse();
                return Some(path);
            }
            for e in &self.outgoing[s.0] {
                if seen.insert(e.dest) {
                    prev.insert(e.dest, (s, e.trigger.as_str()));
                    queue.push_back(e.dest);
                }
            }
        }
        None
    }
}
