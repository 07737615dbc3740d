//! The default night: state names, trigger names and the graph wiring.
//!
//! ```text
//!  SLEEPING ──startup──▶ STARTING ──schedule──▶ SCHEDULING ──observe──▶ OBSERVING
//!     ▲                   │    ▲                 │    │                     │
//!     │            take_darks  restart       focus  take_flats           analyze
//!     │                   ▼    │                 ▼    ▼                     ▼
//!     │               TAKING_DARKS        COARSE_FOCUSING  TWILIGHT_FLATS  ANALYZING
//!     │                   │                      └───────schedule──────────────┘
//!     │               clean_up
//!     │                   ▼
//!  goto_sleep ◀── HOUSEKEEPING ◀──clean_up── PARKED ◀──set_park── PARKING
//!
//!  Any non-parking, non-idle state ──park──▶ PARKING
//! ```

use super::graph::{GraphConfig, StateConfig, TransitionConfig};

pub mod names {
    pub const SLEEPING: &str = "sleeping";
    pub const STARTING: &str = "starting";
    pub const TAKING_DARKS: &str = "taking_darks";
    pub const SCHEDULING: &str = "scheduling";
    pub const COARSE_FOCUSING: &str = "coarse_focusing";
    pub const TWILIGHT_FLAT_FIELDING: &str = "twilight_flat_fielding";
    pub const OBSERVING: &str = "observing";
    pub const ANALYZING: &str = "analyzing";
    pub const PARKING: &str = "parking";
    pub const PARKED: &str = "parked";
    pub const HOUSEKEEPING: &str = "housekeeping";
}

pub mod triggers {
    pub const STARTUP: &str = "startup";
    pub const TAKE_DARKS: &str = "take_darks";
    pub const RESTART: &str = "restart";
    pub const CLEAN_UP: &str = "clean_up";
    pub const SCHEDULE: &str = "schedule";
    pub const FOCUS: &str = "focus";
    pub const TAKE_FLATS: &str = "take_flats";
    pub const OBSERVE: &str = "observe";
    pub const ANALYZE: &str = "analyze";
    pub const PARK: &str = "park";
    pub const SET_PARK: &str = "set_park";
    pub const GOTO_SLEEP: &str = "goto_sleep";
}

use names::*;

fn state(name: &str, tags: &[&str], horizon: Option<&str>, requires_dome: bool) -> StateConfig {
    StateConfig {
        name: name.to_owned(),
        tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        horizon: horizon.map(str::to_owned),
        requires_dome,
    }
}

fn edge(trigger: &str, source: &[&str], dest: &str) -> TransitionConfig {
    TransitionConfig {
        trigger: trigger.to_owned(),
        source: source.iter().map(|s| (*s).to_owned()).collect(),
        dest: dest.to_owned(),
    }
}

/// Huntsman-style nightly graph.
pub fn default_graph_config() -> GraphConfig {
    let states = vec![
        state(SLEEPING, &["always_safe", "idle"], None, false),
        state(STARTING, &["always_safe"], None, false),
        state(TAKING_DARKS, &["always_safe"], None, false),
        state(SCHEDULING, &[], Some("twilight_max"), false),
        state(COARSE_FOCUSING, &[], Some("focus"), true),
        state(TWILIGHT_FLAT_FIELDING, &[], Some("flat"), true),
        state(OBSERVING, &[], Some("observe"), true),
        state(ANALYZING, &[], Some("observe"), true),
        state(PARKING, &["always_safe", "parking"], None, false),
        state(PARKED, &["always_safe", "parking"], None, false),
        state(HOUSEKEEPING, &["always_safe", "idle"], None, false),
    ];

    let transitions = vec![
        edge(triggers::STARTUP, &[SLEEPING], STARTING),
        edge(triggers::TAKE_DARKS, &[STARTING, PARKED], TAKING_DARKS),
        edge(triggers::RESTART, &[TAKING_DARKS], STARTING),
        edge(triggers::CLEAN_UP, &[TAKING_DARKS, PARKED], HOUSEKEEPING),
        edge(
            triggers::SCHEDULE,
            &[STARTING, COARSE_FOCUSING, TWILIGHT_FLAT_FIELDING, ANALYZING],
            SCHEDULING,
        ),
        edge(triggers::FOCUS, &[SCHEDULING], COARSE_FOCUSING),
        edge(triggers::TAKE_FLATS, &[SCHEDULING], TWILIGHT_FLAT_FIELDING),
        edge(triggers::OBSERVE, &[SCHEDULING], OBSERVING),
        edge(triggers::ANALYZE, &[OBSERVING], ANALYZING),
        edge(
            triggers::PARK,
            &[
                STARTING,
                TAKING_DARKS,
                SCHEDULING,
                COARSE_FOCUSING,
                TWILIGHT_FLAT_FIELDING,
                OBSERVING,
                ANALYZING,
            ],
            PARKING,
        ),
        edge(triggers::SET_PARK, &[PARKING], PARKED),
        edge(triggers::GOTO_SLEEP, &[PARKED, HOUSEKEEPING], SLEEPING),
    ];

    GraphConfig {
        initial: SLEEPING.to_owned(),
        parked: PARKED.to_owned(),
        park_trigger: triggers::PARK.to_owned(),
        states,
        transitions,
    }
}
