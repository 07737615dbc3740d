//! Control loop scenarios against the mock observatory.

use nightwatch::app::{ControlCommand, ControlEvent, LoopState, TickOutcome};
use nightwatch::error::Error;

use crate::mock_observatory::{Harness, night, noon};

const CAM: &str = "huntsman.cam0";
const MOUNT: &str = "huntsman.mount";
const DOME: &str = "huntsman.dome";

fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
    list.iter()
        .map(|(a, b)| ((*a).to_owned(), (*b).to_owned()))
        .collect()
}

// ── Nominal night ─────────────────────────────────────────────

#[test]
fn clear_night_reaches_observing() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("observing", 10));

    assert_eq!(
        h.sink.transitions(),
        pairs(&[
            ("sleeping", "starting"),
            ("starting", "scheduling"),
            ("scheduling", "coarse_focusing"),
            ("coarse_focusing", "scheduling"),
            ("scheduling", "observing"),
        ])
    );
    assert_eq!(h.devices.count(DOME, "open"), 2);
    assert_eq!(h.devices.count(MOUNT, "slew_to"), 1);
    assert_eq!(h.devices.count(CAM, "expose"), 1);
    assert_eq!(h.controller.status().observation.as_deref(), Some("NGC 300"));
}

#[test]
fn started_event_is_emitted_once() {
    let mut h = Harness::at(night());
    h.start();
    h.start();
    let started = h
        .sink
        .events
        .iter()
        .filter(|e| matches!(e, ControlEvent::Started { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(h.controller.loop_state(), LoopState::Running);
}

#[test]
fn daylight_keeps_sleeping() {
    let mut h = Harness::at(noon());
    h.start();
    for _ in 0..3 {
        assert_eq!(h.tick(), TickOutcome::Holding);
    }
    assert_eq!(h.state(), "sleeping");
    assert!(h.devices.actions().is_empty());
}

#[test]
fn nothing_happens_before_start() {
    let mut h = Harness::at(night());
    assert_eq!(h.tick(), TickOutcome::Holding);
    assert_eq!(h.state(), "sleeping");
    assert_eq!(h.controller.loop_state(), LoopState::Idle);
}

// ── Safety ────────────────────────────────────────────────────

#[test]
fn rain_while_observing_parks_next_tick() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("observing", 10));

    h.devices.set_raining(true);
    assert_eq!(h.tick(), TickOutcome::Moved);

    assert_eq!(h.state(), "parking");
    assert!(h.sink.has(|e| matches!(
        e,
        ControlEvent::SafetyFailed { state, condition, .. }
            if state == "observing" && condition == "observe"
    )));
    assert_eq!(h.devices.count(DOME, "close"), 1);
    assert_eq!(h.devices.count(MOUNT, "park"), 1);
    assert!(!h.controller.status().last_safety.unwrap().is_safe());

    h.tick();
    assert_eq!(h.state(), "parked");
}

#[test]
fn cloudy_night_takes_darks_and_never_opens() {
    let mut h = Harness::at(night());
    h.devices.set_cloudy(true);
    h.start();
    for _ in 0..6 {
        h.tick();
    }

    let seen = h.sink.transitions();
    assert!(seen.contains(&("starting".to_owned(), "taking_darks".to_owned())));
    assert!(seen.contains(&("taking_darks".to_owned(), "starting".to_owned())));
    assert_eq!(h.devices.count(CAM, "expose"), 2);
    // Focus needs the dome open: refused, then parked.
    assert!(h.sink.has(|e| matches!(
        e,
        ControlEvent::TriggerRejected { trigger, .. } if trigger == "focus"
    )));
    assert!(seen.contains(&("scheduling".to_owned(), "parking".to_owned())));
    assert_eq!(h.devices.count(DOME, "open"), 0);
}

#[test]
fn cloudy_night_restarts_a_bounded_number_of_times() {
    let mut h = Harness::at(night());
    h.devices.set_cloudy(true);
    h.start();
    for _ in 0..60 {
        h.tick();
    }

    let restarts = |h: &Harness| {
        h.sink
            .transitions()
            .iter()
            .filter(|(from, to)| from == "sleeping" && to == "starting")
            .count()
    };
    // The first start plus one restart per retry.
    assert_eq!(restarts(&h), 4);
    assert_eq!(h.state(), "sleeping");
    assert_eq!(h.controller.status().run_retries, 0);
    assert_eq!(h.tick(), TickOutcome::Holding);

    h.start();
    assert_eq!(h.controller.status().run_retries, 3);
    h.tick();
    assert_eq!(h.state(), "starting");
    assert_eq!(restarts(&h), 5);
}

#[test]
fn lost_weather_station_is_unsafe() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("observing", 10));

    h.registry.deregister("huntsman.weather");
    h.clock.advance(std::time::Duration::from_secs(600));
    h.tick();
    assert_eq!(h.state(), "parking");
}

// ── Device failures ───────────────────────────────────────────

#[test]
fn failed_action_is_retried_next_tick() {
    let mut h = Harness::at(night());
    h.devices.fail(CAM, "set_cooling", 1);
    h.start();

    h.tick();
    assert_eq!(h.state(), "starting");
    assert_eq!(h.devices.count(MOUNT, "unpark"), 0);
    assert!(h.sink.has(|e| matches!(
        e,
        ControlEvent::DeviceFailed { device, attempt: 1, .. } if device == "camera0"
    )));

    h.tick();
    assert_eq!(h.state(), "starting");
    assert_eq!(h.devices.count(CAM, "set_cooling"), 2);
    assert_eq!(h.devices.count(MOUNT, "unpark"), 1);
    assert_eq!(h.controller.status().failed_attempts, 0);

    h.tick();
    assert_eq!(h.state(), "scheduling");
}

#[test]
fn exhausted_attempts_escalate_to_park() {
    let mut h = Harness::at(night());
    h.devices.fail_always(MOUNT, "unpark");
    h.start();
    for _ in 0..3 {
        h.tick();
    }
    assert_eq!(h.state(), "parking");
    assert_eq!(h.devices.count(MOUNT, "unpark"), 3);
    assert!(
        h.sink
            .transitions()
            .contains(&("starting".to_owned(), "parking".to_owned()))
    );
}

#[test]
fn parking_failure_stops_the_loop() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("observing", 10));

    h.devices.fail_always(MOUNT, "park");
    h.devices.set_raining(true);
    h.tick();
    assert_eq!(h.state(), "parking");
    h.tick();
    assert_eq!(h.tick(), TickOutcome::Halted);

    assert!(h.sink.has(|e| matches!(
        e,
        ControlEvent::ParkingFailed { attempts: 3, .. }
    )));
    assert_eq!(h.controller.loop_state(), LoopState::Stopped);
    assert_eq!(h.devices.count(MOUNT, "park"), 3);
    assert_eq!(h.tick(), TickOutcome::Halted);
}

// ── Interrupt, stop, shutdown ─────────────────────────────────

#[test]
fn interrupt_in_scheduling_drains_to_sleep() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("scheduling", 5));

    h.controller.interrupt();
    h.tick();

    let tail: Vec<_> = h.sink.transitions().split_off(2);
    assert_eq!(
        tail,
        pairs(&[
            ("scheduling", "parking"),
            ("parking", "parked"),
            ("parked", "housekeeping"),
            ("housekeeping", "sleeping"),
        ])
    );
    assert!(h.sink.has(|e| matches!(e, ControlEvent::Interrupted { state } if state == "scheduling")));
    assert_eq!(h.devices.count(MOUNT, "park"), 1);
    assert_eq!(h.state(), "sleeping");
    assert_eq!(h.controller.loop_state(), LoopState::Interrupted);
    assert!(!h.controller.machine().is_interrupted());
}

#[test]
fn interrupted_drain_waits_for_the_dome_to_close() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("scheduling", 5));

    h.devices.fail(DOME, "close", 1);
    h.controller.interrupt();
    h.tick();

    assert_eq!(h.state(), "parking");
    assert_eq!(h.devices.count(MOUNT, "park"), 0);
    assert!(h.sink.has(|e| matches!(
        e,
        ControlEvent::DeviceFailed { device, attempt: 1, .. } if device == "dome"
    )));

    h.tick();
    assert_eq!(h.state(), "sleeping");
    assert_eq!(h.devices.count(DOME, "close"), 2);
    assert_eq!(h.devices.count(MOUNT, "park"), 1);
}

#[test]
fn interrupted_drain_raises_parking_failure() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("observing", 10));

    h.devices.fail_always(DOME, "close");
    h.devices.fail_always(MOUNT, "park");
    h.controller.interrupt();
    h.tick();
    h.tick();
    assert_eq!(h.tick(), TickOutcome::Halted);

    assert_eq!(h.state(), "parking");
    assert_eq!(h.devices.count(DOME, "close"), 3);
    assert_eq!(h.devices.count(MOUNT, "park"), 0);
    assert!(h.sink.has(|e| matches!(
        e,
        ControlEvent::ParkingFailed { attempts: 3, .. }
    )));
    assert_eq!(h.controller.loop_state(), LoopState::Stopped);
    assert!(matches!(
        h.controller.start(&mut h.sink),
        Err(Error::StartRefused { .. })
    ));
}

#[test]
fn mount_that_never_parks_halts_the_drain() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("scheduling", 5));

    h.devices.fail_always(MOUNT, "park");
    h.controller.interrupt();
    for _ in 0..3 {
        h.tick();
    }

    assert_eq!(h.state(), "parking");
    assert_eq!(h.devices.count(MOUNT, "park"), 3);
    assert_eq!(h.devices.count(DOME, "close"), 1);
    assert!(h.sink.has(|e| matches!(e, ControlEvent::ParkingFailed { .. })));
    assert!(!h.sink.transitions().contains(&("parking".to_owned(), "parked".to_owned())));
    assert_eq!(h.tick(), TickOutcome::Halted);
}

#[test]
fn start_refused_until_drained() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("scheduling", 5));

    h.controller.interrupt();
    assert!(matches!(
        h.controller.start(&mut h.sink),
        Err(Error::StartRefused { .. })
    ));
    h.tick();
    assert_eq!(h.state(), "sleeping");

    h.start();
    assert_eq!(h.controller.loop_state(), LoopState::Running);
    h.tick();
    assert_eq!(h.state(), "starting");
}

#[test]
fn interrupt_is_seen_after_the_call_in_flight() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("scheduling", 5));

    // Raised while the dome is opening for the focus run.
    h.devices.interrupt_on("open", h.controller.interrupt_flag());
    h.tick();
    assert_eq!(h.state(), "coarse_focusing");
    assert_eq!(h.devices.count(DOME, "open"), 1);
    assert_eq!(h.devices.count(CAM, "autofocus"), 0);

    h.tick();
    assert_eq!(h.state(), "sleeping");
    assert_eq!(h.devices.count(CAM, "autofocus"), 0);
}

#[test]
fn stop_only_when_parked() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("observing", 10));

    let refused = h.controller.handle_command(ControlCommand::Stop, &mut h.sink);
    assert!(matches!(refused, Err(Error::StopRefused { state }) if state == "observing"));

    h.devices.set_raining(true);
    assert!(h.tick_until("parked", 3));
    h.controller
        .handle_command(ControlCommand::Stop, &mut h.sink)
        .unwrap();
    assert_eq!(h.controller.loop_state(), LoopState::Stopped);
    assert!(h.sink.has(|e| matches!(e, ControlEvent::Stopped { state } if state == "parked")));
}

#[test]
fn shutdown_parks_then_stops() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("observing", 10));

    h.controller
        .handle_command(ControlCommand::Shutdown, &mut h.sink)
        .unwrap();
    assert_eq!(h.tick(), TickOutcome::Halted);
    assert_eq!(h.state(), "parked");
    assert_eq!(h.controller.loop_state(), LoopState::Stopped);
    assert_eq!(h.devices.count(MOUNT, "park"), 1);
}

#[test]
fn shutdown_at_rest_stops_at_once() {
    let mut h = Harness::at(noon());
    h.start();
    h.tick();
    h.controller
        .handle_command(ControlCommand::Shutdown, &mut h.sink)
        .unwrap();
    assert_eq!(h.controller.loop_state(), LoopState::Stopped);
    assert_eq!(h.tick(), TickOutcome::Halted);
    assert!(
        h.controller
            .handle_command(ControlCommand::Start, &mut h.sink)
            .is_err()
    );
}

// ── Status and history ────────────────────────────────────────

#[test]
fn history_and_status_track_transitions() {
    let mut h = Harness::at(night());
    h.start();
    assert!(h.tick_until("observing", 10));

    let history = h.controller.history();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].trigger, "startup");
    assert_eq!(history[4].to, "observing");

    let status = h.controller.status();
    assert_eq!(status.state, "observing");
    assert_eq!(status.transitions, 5);
    assert!(status.sun_altitude_deg < -18.0);
    assert!(status.last_safety.unwrap().is_safe());
}

#[test]
fn history_keeps_the_latest_transitions() {
    let mut h = Harness::at(night());
    h.start();
    for _ in 0..60 {
        h.tick();
    }
    let history = h.controller.history();
    assert_eq!(history.len(), nightwatch::app::service::HISTORY_LEN);
    assert!(h.controller.status().transitions > 32);
    let last = history.last().unwrap();
    assert_eq!(last.to, h.state());
}
