//! The control thread driven through a `ControlHandle`.

use std::time::Duration;

use nightwatch::app::{ControlEvent, LoopState, spawn};

use crate::mock_observatory::{Harness, RecordingSink, night, noon, test_config};

fn fast() -> nightwatch::config::SystemConfig {
    let mut config = test_config();
    config.control.status_check_interval_ms = 5;
    config.control.wait_delay_ms = 1;
    config
}

#[test]
fn shutdown_at_rest_joins_stopped() {
    let h = Harness::with_config(noon(), &fast());
    let (handle, join) = spawn(h.controller, RecordingSink::default()).unwrap();

    assert!(handle.start());
    std::thread::sleep(Duration::from_millis(30));
    assert!(handle.shutdown());

    let controller = join.join().unwrap();
    assert_eq!(controller.loop_state(), LoopState::Stopped);
    assert_eq!(controller.machine().current_name(), "sleeping");
}

#[test]
fn night_run_shuts_down_parked() {
    let h = Harness::with_config(night(), &fast());
    let devices = h.devices.clone();
    let (handle, join) = spawn(h.controller, RecordingSink::default()).unwrap();

    handle.start();
    std::thread::sleep(Duration::from_millis(100));
    handle.shutdown();

    let controller = join.join().unwrap();
    assert_eq!(controller.loop_state(), LoopState::Stopped);
    assert_eq!(controller.machine().current_name(), "parked");
    assert!(devices.count("huntsman.mount", "park") >= 1);
    assert!(!handle.start(), "thread has exited");
}

#[test]
fn dropping_every_handle_ends_the_thread() {
    let h = Harness::with_config(noon(), &fast());
    let (handle, join) = spawn(h.controller, RecordingSink::default()).unwrap();
    drop(handle);
    let controller = join.join().unwrap();
    assert_eq!(controller.loop_state(), LoopState::Idle);
}

#[test]
fn events_reach_the_sink() {
    use nightwatch::app::EventSink;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<ControlEvent>>>);

    impl EventSink for Shared {
        fn emit(&mut self, event: &ControlEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    let sink = Shared::default();
    let h = Harness::with_config(night(), &fast());
    let (handle, join) = spawn(h.controller, sink.clone()).unwrap();
    handle.start();
    std::thread::sleep(Duration::from_millis(50));
    handle.shutdown();
    join.join().unwrap();

    let events = sink.0.lock().unwrap();
    assert!(matches!(events.first(), Some(ControlEvent::Started { .. })));
    assert!(matches!(events.last(), Some(ControlEvent::Stopped { state }) if state == "parked"));
}
