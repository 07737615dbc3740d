//! Control thread.
//!
//! The controller runs on its own thread. Commands reach it over a flume
//! channel and are applied between ticks; the channel's receive timeout is
//! the tick period. An interrupt also flips the machine's shared flag right
//! away so a long device action can yield at its next call boundary.
//! Shutdown goes through the channel only: it must be seen together with
//! its stop request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use flume::{RecvTimeoutError, Sender};
use log::{info, warn};

use super::commands::ControlCommand;
use super::ports::EventSink;
use super::service::{Controller, TickOutcome};

/// Cloneable handle for sending commands into a running controller.
#[derive(Clone)]
pub struct ControlHandle {
    tx: Sender<ControlCommand>,
    interrupt: Arc<AtomicBool>,
}

impl ControlHandle {
    /// `false` once the control thread has exited.
    pub fn send(&self, cmd: ControlCommand) -> bool {
        if cmd == ControlCommand::Interrupt {
            self.interrupt.store(true, Ordering::SeqCst);
        }
        self.tx.send(cmd).is_ok()
    }

    pub fn start(&self) -> bool {
        self.send(ControlCommand::Start)
    }

    pub fn interrupt(&self) -> bool {
        self.send(ControlCommand::Interrupt)
    }

    pub fn stop(&self) -> bool {
        self.send(ControlCommand::Stop)
    }

    pub fn shutdown(&self) -> bool {
        self.send(ControlCommand::Shutdown)
    }
}

/// Run `controller` on a new thread until it halts or every handle is
/// dropped. The thread returns the controller for inspection.
pub fn spawn<S>(mut controller: Controller, mut sink: S) -> std::io::Result<(ControlHandle, JoinHandle<Controller>)>
where
    S: EventSink + Send + 'static,
{
    let (tx, rx) = flume::unbounded();
    let handle = ControlHandle {
        tx,
        interrupt: controller.interrupt_flag(),
    };

    let join = thread::Builder::new()
        .name("control".into())
        .spawn(move || {
            info!("Control thread running");
            let mut delay = controller.status_interval();
            loop {
                match rx.recv_timeout(delay) {
                    Ok(cmd) => {
                        if let Err(e) = controller.handle_command(cmd, &mut sink) {
                            warn!("{cmd:?}: {e}");
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("Control handles dropped, leaving loop");
                        break;
                    }
                }

                delay = match controller.tick(&mut sink) {
                    TickOutcome::Moved => controller.wait_delay(),
                    TickOutcome::Holding => controller.status_interval(),
                    TickOutcome::Halted => break,
                };
            }
            info!("Control thread exiting in {}", controller.machine().current_name());
            controller
        })?;

    Ok((handle, join))
}
