//! Registry daemon: the TCP front end plus the auto-clean sweeper.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

use super::Registry;
use super::protocol::{self, RegistryRequest};
use crate::rpc::listener::FrameListener;

/// Granularity at which the sweeper notices shutdown.
const SWEEP_POLL: Duration = Duration::from_millis(100);

pub struct RegistryServer {
    registry: Arc<Registry>,
    listener: FrameListener,
    stop_sweeper: Arc<AtomicBool>,
    sweeper: Option<JoinHandle<()>>,
}

impl RegistryServer {
    /// Serve `registry` on `addr` and sweep it every `sweep_interval`.
    pub fn start(
        addr: &str,
        registry: Arc<Registry>,
        sweep_interval: Duration,
    ) -> io::Result<Self> {
        let served = Arc::clone(&registry);
        let listener = FrameListener::bind("REGISTRY", addr, move |req: RegistryRequest| {
            protocol::handle(&served, req)
        })?;

        let stop_sweeper = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_sweeper);
        let swept = Arc::clone(&registry);
        let sweeper = thread::Builder::new()
            .name("registry-sweep".into())
            .spawn(move || sweep_loop(&swept, sweep_interval, &stop))?;

        info!(
            "REGISTRY: serving on {} (auto-clean every {}s)",
            listener.local_addr(),
            sweep_interval.as_secs()
        );
        Ok(Self {
            registry,
            listener,
            stop_sweeper,
            sweeper: Some(sweeper),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn shutdown(&mut self) {
        self.stop_sweeper.store(true, Ordering::Release);
        if let Some(handle) = self.sweeper.take() {
            if handle.join().is_err() {
                warn!("REGISTRY: sweeper thread panicked");
            }
        }
        self.listener.shutdown();
    }
}

impl Drop for RegistryServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep_loop(registry: &Registry, interval: Duration, stop: &AtomicBool) {
    let mut next = Instant::now() + interval;
    while !stop.load(Ordering::Acquire) {
        if Instant::now() >= next {
            registry.sweep_expired();
            next = Instant::now() + interval;
        }
        thread::sleep(SWEEP_POLL.min(interval));
    }
}
