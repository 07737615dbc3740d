//! Threaded request/response TCP listener.
//!
//! ```text
//!  accept thread ── polls accept() every 50 ms ──▶ spawn per-connection
//!                                                  thread: read frame →
//!                                                  handler → write frame
//! ```
//!
//! Shared by the registry daemon and the device service host. Connection
//! threads are detached; they end when the peer hangs up, idles past the
//! read timeout, or the listener shuts down.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::codec::{self, WireError};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct FrameListener {
    label: &'static str,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl FrameListener {
    /// Bind `addr` (port 0 picks a free port) and serve `handler`.
    pub fn bind<Req, Resp, H>(label: &'static str, addr: &str, handler: H) -> io::Result<Self>
    where
        Req: DeserializeOwned + 'static,
        Resp: Serialize + 'static,
        H: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("{label}: listening on {local_addr}");

        let shutdown = Arc::new(AtomicBool::new(false));
        let handler = Arc::new(handler);
        let stop = Arc::clone(&shutdown);
        let accept = thread::Builder::new()
            .name(format!("{label}-accept"))
            .spawn(move || accept_loop::<Req, Resp, H>(label, &listener, &stop, &handler))?;

        Ok(Self {
            label,
            local_addr,
            shutdown,
            accept: Some(accept),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and join the accept thread.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept.take() {
            if handle.join().is_err() {
                warn!("{}: accept thread panicked", self.label);
            }
            info!("{}: stopped", self.label);
        }
    }
}

impl Drop for FrameListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop<Req, Resp, H>(
    label: &'static str,
    listener: &TcpListener,
    shutdown: &Arc<AtomicBool>,
    handler: &Arc<H>,
) where
    Req: DeserializeOwned + 'static,
    Resp: Serialize + 'static,
    H: Fn(Req) -> Resp + Send + Sync + 'static,
{
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("{label}: connection from {peer}");
                let handler = Arc::clone(handler);
                let stop = Arc::clone(shutdown);
                let spawned = thread::Builder::new()
                    .name(format!("{label}-conn"))
                    .spawn(move || {
                        serve_connection::<Req, Resp, H>(label, stream, &stop, handler.as_ref());
                    });
                if let Err(e) = spawned {
                    warn!("{label}: could not spawn connection thread: {e}");
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("{label}: accept error: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve_connection<Req, Resp, H>(
    label: &'static str,
    mut stream: TcpStream,
    shutdown: &AtomicBool,
    handler: &H,
) where
    Req: DeserializeOwned,
    Resp: Serialize,
    H: Fn(Req) -> Resp,
{
    if stream.set_nonblocking(false).is_err() || stream.set_read_timeout(Some(IDLE_TIMEOUT)).is_err()
    {
        warn!("{label}: failed to configure client socket");
        return;
    }

    while !shutdown.load(Ordering::Acquire) {
        let request: Req = match codec::read_message(&mut stream) {
            Ok(req) => req,
            Err(WireError::Closed) => break,
            Err(e) => {
                debug!("{label}: dropping connection: {e}");
                break;
            }
        };
        if let Err(e) = codec::write_message(&mut stream, &handler(request)) {
            debug!("{label}: reply failed: {e}");
            break;
        }
    }
}
