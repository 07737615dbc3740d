//! Which trigger to fire next.
//!
//! The machine only knows which edges exist; a [`TriggerPolicy`] picks one
//! each tick from the current state and what the sky, the weather and the
//! scheduler say. The controller still checks safety before firing, so a
//! policy can be optimistic.

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info};

use crate::app::ports::{Observation, TargetScheduler};
use crate::error::ConfigError;
use crate::fsm::StateDef;
use crate::fsm::states::{names, triggers};
use crate::safety::{Enclosure, Horizon, HorizonTable, SafetyEvaluator};

/// What a policy can see and touch during one decision.
pub struct PolicyContext<'a> {
    pub state: &'a StateDef,
    pub now: DateTime<Utc>,
    pub safety: &'a SafetyEvaluator,
    pub scheduler: &'a mut dyn TargetScheduler,
    /// Target for the observing state; set by the policy when it schedules.
    pub observation: &'a mut Option<Observation>,
    /// An operator asked for a night's run.
    pub start_requested: bool,
}

pub trait TriggerPolicy: Send {
    /// `None` means stay put this tick.
    fn next_trigger(&mut self, ctx: &mut PolicyContext<'_>) -> Option<String>;

    /// Called after every transition.
    fn entered(&mut self, _state: &StateDef) {}
}

// ---------------------------------------------------------------------------
// Nightly policy
// ---------------------------------------------------------------------------

/// How far ahead to look when deciding whether the sun is setting.
const TREND_WINDOW_MINUTES: i64 = 10;

/// The default night: darks when the weather is bad, a coarse focus once
/// it is dark enough, twilight flats, then science until dawn.
pub struct NightlyPolicy {
    startup: Horizon,
    flat: Horizon,
    focus: Horizon,
    observe: Horizon,
    darks_due: bool,
    focus_due: bool,
    flats_due: bool,
}

impl NightlyPolicy {
    pub fn new(horizons: &HorizonTable) -> Result<Self, ConfigError> {
        Ok(Self {
            startup: horizons.resolve("startup")?,
            flat: horizons.resolve("flat")?,
            focus: horizons.resolve("focus")?,
            observe: horizons.resolve("observe")?,
            darks_due: true,
            focus_due: true,
            flats_due: true,
        })
    }

    pub fn darks_due(&self) -> bool {
        self.darks_due
    }

    pub fn focus_due(&self) -> bool {
        self.focus_due
    }

    pub fn flats_due(&self) -> bool {
        self.flats_due
    }

    fn sun_setting(ctx: &PolicyContext<'_>) -> bool {
        let later = ctx.now + TimeDelta::minutes(TREND_WINDOW_MINUTES);
        ctx.safety.current_sun_altitude(later)
            < ctx.safety.current_sun_altitude(ctx.now)
    }

    fn schedule(&mut self, ctx: &mut PolicyContext<'_>) -> &'static str {
        let (safety, now) = (ctx.safety, ctx.now);
        let dark = |h: &Horizon| safety.is_dark(h, now);

        if self.focus_due && dark(&self.focus) {
            return triggers::FOCUS;
        }
        if dark(&self.observe) {
            return match ctx.scheduler.next_observation(now) {
                Some(obs) => {
                    info!("POLICY: scheduled {}", obs.name);
                    *ctx.observation = Some(obs);
                    triggers::OBSERVE
                }
                None => {
                    info!("POLICY: nothing observable, parking");
                    triggers::PARK
                }
            };
        }
        if self.flats_due && dark(&self.flat) {
            return triggers::TAKE_FLATS;
        }
        triggers::PARK
    }
}

impl TriggerPolicy for NightlyPolicy {
    fn next_trigger(&mut self, ctx: &mut PolicyContext<'_>) -> Option<String> {
        let state = ctx.state;
        let bad_weather = !ctx.safety.weather_is_safe(ctx.now);
        let trigger = match state.name.as_str() {
            names::SLEEPING => {
                let ready = ctx.start_requested
                    && ctx
                        .safety
                        .evaluate(&self.startup, Enclosure::Closed, ctx.now)
                        .is_safe();
                ready.then_some(triggers::STARTUP)?
            }
            names::STARTING => {
                if self.darks_due && bad_weather {
                    triggers::TAKE_DARKS
                } else {
                    triggers::SCHEDULE
                }
            }
            names::TAKING_DARKS => triggers::RESTART,
            names::SCHEDULING => {
                // Too early for anything but the sun is going down: wait.
                let early = !ctx.safety.is_dark(&self.flat, ctx.now) && Self::sun_setting(ctx);
                if early {
                    debug!("POLICY: waiting for twilight");
                    return None;
                }
                self.schedule(ctx)
            }
            names::COARSE_FOCUSING | names::TWILIGHT_FLAT_FIELDING | names::ANALYZING => {
                triggers::SCHEDULE
            }
            names::OBSERVING => {
                if let Some(obs) = ctx.observation.take() {
                    ctx.scheduler.observation_complete(&obs);
                }
                triggers::ANALYZE
            }
            names::PARKING => triggers::SET_PARK,
            names::PARKED => {
                let dark = ctx.safety.is_dark(&self.startup, ctx.now);
                if self.darks_due && dark && bad_weather {
                    triggers::TAKE_DARKS
                } else {
                    triggers::CLEAN_UP
                }
            }
            names::HOUSEKEEPING => triggers::GOTO_SLEEP,
            _ => return None,
        };
        Some(trigger.to_owned())
    }

    fn entered(&mut self, state: &StateDef) {
        match state.name.as_str() {
            names::TAKING_DARKS => self.darks_due = false,
            names::COARSE_FOCUSING => self.focus_due = false,
            names::TWILIGHT_FLAT_FIELDING => self.flats_due = false,
            // A new run starts from sleeping.
            names::SLEEPING => {
                self.darks_due = true;
                self.focus_due = true;
                self.flats_due = true;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::StateGraph;
    use crate::fsm::states::default_graph_config;
    use crate::safety::{SafetyConfig, default_horizons};
    use crate::sensors::{PowerReading, SensorCache, WeatherReading};
    use crate::solar::ObserverLocation;
    use chrono::TimeZone;
    use std::sync::Arc;

    /// Deep night at Siding Spring.
    fn night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 4, 29, 13, 0, 0).unwrap()
    }

    /// Local noon.
    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 4, 29, 2, 0, 0).unwrap()
    }

    struct Fixed(Vec<Observation>, usize);

    impl TargetScheduler for Fixed {
        fn next_observation(&mut self, _now: DateTime<Utc>) -> Option<Observation> {
            self.0.first().cloned()
        }

        fn observation_complete(&mut self, _observation: &Observation) {
            self.1 += 1;
        }
    }

    fn target() -> Observation {
        Observation {
            name: "NGC 300".into(),
            ra_deg: 13.72,
            dec_deg: -37.68,
            exposure_secs: 30.0,
        }
    }

    struct Fixture {
        graph: StateGraph,
        safety: SafetyEvaluator,
        sensors: Arc<SensorCache>,
        policy: NightlyPolicy,
        scheduler: Fixed,
        observation: Option<Observation>,
    }

    impl Fixture {
        fn new() -> Self {
            let horizons = HorizonTable::new(default_horizons()).unwrap();
            let sensors = Arc::new(SensorCache::new());
            let safety = SafetyEvaluator::new(
                ObserverLocation::SIDING_SPRING,
                horizons.clone(),
                &SafetyConfig::default(),
                Arc::clone(&sensors),
            );
            Self {
                graph: StateGraph::build(&default_graph_config(), &horizons).unwrap(),
                policy: NightlyPolicy::new(&horizons).unwrap(),
                safety,
                sensors,
                scheduler: Fixed(vec![target()], 0),
                observation: None,
            }
        }

        fn weather(&self, at: DateTime<Utc>, raining: bool) {
            let mut w = WeatherReading::clear(at);
            w.is_raining = raining;
            self.sensors.update_weather(w);
            self.sensors.update_power(PowerReading::nominal(at));
        }

        fn decide(&mut self, state: &str, now: DateTime<Utc>, start: bool) -> Option<String> {
            let def = self.graph.state(self.graph.id_of(state).unwrap());
            let mut ctx = PolicyContext {
                state: def,
                now,
                safety: &self.safety,
                scheduler: &mut self.scheduler,
                observation: &mut self.observation,
                start_requested: start,
            };
            self.policy.next_trigger(&mut ctx)
        }
    }

    #[test]
    fn sleeping_waits_for_a_start_request() {
        let mut f = Fixture::new();
        f.weather(night(), false);
        assert_eq!(f.decide(names::SLEEPING, night(), false), None);
        assert_eq!(
            f.decide(names::SLEEPING, night(), true).as_deref(),
            Some(triggers::STARTUP)
        );
    }

    #[test]
    fn sleeping_stays_asleep_in_daylight() {
        let mut f = Fixture::new();
        f.weather(noon(), false);
        assert_eq!(f.decide(names::SLEEPING, noon(), true), None);
    }

    #[test]
    fn bad_weather_start_takes_darks_once() {
        let mut f = Fixture::new();
        f.weather(night(), true);
        assert_eq!(
            f.decide(names::STARTING, night(), true).as_deref(),
            Some(triggers::TAKE_DARKS)
        );
        let darks = f.graph.state(f.graph.id_of(names::TAKING_DARKS).unwrap()).clone();
        f.policy.entered(&darks);
        assert!(!f.policy.darks_due());
        assert_eq!(
            f.decide(names::STARTING, night(), true).as_deref(),
            Some(triggers::SCHEDULE)
        );
    }

    #[test]
    fn scheduling_prefers_focus_then_observes() {
        let mut f = Fixture::new();
        f.weather(night(), false);
        assert_eq!(
            f.decide(names::SCHEDULING, night(), true).as_deref(),
            Some(triggers::FOCUS)
        );

        let focusing = f.graph.state(f.graph.id_of(names::COARSE_FOCUSING).unwrap()).clone();
        f.policy.entered(&focusing);
        assert_eq!(
            f.decide(names::SCHEDULING, night(), true).as_deref(),
            Some(triggers::OBSERVE)
        );
        assert_eq!(f.observation, Some(target()));
    }

    #[test]
    fn empty_schedule_parks() {
        let mut f = Fixture::new();
        f.weather(night(), false);
        f.scheduler.0.clear();
        let focusing = f.graph.state(f.graph.id_of(names::COARSE_FOCUSING).unwrap()).clone();
        f.policy.entered(&focusing);
        assert_eq!(
            f.decide(names::SCHEDULING, night(), true).as_deref(),
            Some(triggers::PARK)
        );
    }

    #[test]
    fn observing_reports_completion() {
        let mut f = Fixture::new();
        f.observation = Some(target());
        assert_eq!(
            f.decide(names::OBSERVING, night(), true).as_deref(),
            Some(triggers::ANALYZE)
        );
        assert_eq!(f.scheduler.1, 1);
        assert!(f.observation.is_none());
    }

    #[test]
    fn parked_cleans_up_in_good_weather() {
        let mut f = Fixture::new();
        f.weather(night(), false);
        assert_eq!(
            f.decide(names::PARKED, night(), true).as_deref(),
            Some(triggers::CLEAN_UP)
        );
        f.weather(night(), true);
        assert_eq!(
            f.decide(names::PARKED, night(), true).as_deref(),
            Some(triggers::TAKE_DARKS)
        );
    }

    #[test]
    fn sleeping_resets_the_run() {
        let mut f = Fixture::new();
        for s in [names::TAKING_DARKS, names::COARSE_FOCUSING, names::TWILIGHT_FLAT_FIELDING] {
            let def = f.graph.state(f.graph.id_of(s).unwrap()).clone();
            f.policy.entered(&def);
        }
        assert!(!f.policy.flats_due());
        let sleeping = f.graph.state(f.graph.initial()).clone();
        f.policy.entered(&sleeping);
        assert!(f.policy.darks_due() && f.policy.focus_due() && f.policy.flats_due());
    }
}
