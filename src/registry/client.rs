//! Blocking registry client and the background lease keeper.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::protocol::{RegistryRequest, RegistryResponse};
use super::{Directory, Metadata, RegistryError, ServiceAddress, ServiceRecord};
use crate::rpc::codec::{self, WireError};

/// Talks to a [`RegistryServer`](super::RegistryServer) over one reused
/// connection, reconnecting once if the cached connection has gone bad.
pub struct RegistryClient {
    host: String,
    port: u16,
    timeout: Duration,
    conn: Mutex<Option<TcpStream>>,
}

impl RegistryClient {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            conn: Mutex::new(None),
        }
    }

    fn resolve(&self) -> Result<SocketAddr, RegistryError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| RegistryError::Transport(e.to_string()))?
            .next()
            .ok_or_else(|| RegistryError::Transport(format!("cannot resolve {}", self.host)))
    }

    fn connect(&self) -> Result<TcpStream, RegistryError> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .and_then(|()| stream.set_write_timeout(Some(self.timeout)))
            .and_then(|()| stream.set_nodelay(true))
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        Ok(stream)
    }

    fn exchange(
        stream: &mut TcpStream,
        request: &RegistryRequest,
    ) -> Result<RegistryResponse, WireError> {
        codec::write_message(stream, request)?;
        codec::read_message(stream)
    }

    fn request(&self, request: &RegistryRequest) -> Result<RegistryResponse, RegistryError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(stream) = conn.as_mut() {
            match Self::exchange(stream, request) {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    debug!("REGISTRY client: cached connection failed ({e}), reconnecting");
                    *conn = None;
                }
            }
        }

        let mut stream = self.connect()?;
        let resp = Self::exchange(&mut stream, request)
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        *conn = Some(stream);
        Ok(resp)
    }

    pub fn ping(&self) -> Result<(), RegistryError> {
        match self.request(&RegistryRequest::Ping)? {
            RegistryResponse::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    pub fn list(&self) -> Result<Vec<ServiceRecord>, RegistryError> {
        match self.request(&RegistryRequest::List)? {
            RegistryResponse::Entries(entries) => Ok(entries),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(resp: &RegistryResponse) -> RegistryError {
    match resp {
        RegistryResponse::Rejected(reason) => RegistryError::Rejected(reason.clone()),
        other => RegistryError::Rejected(format!("unexpected response {other:?}")),
    }
}

impl Directory for RegistryClient {
    fn register(
        &self,
        name: &str,
        address: ServiceAddress,
        metadata: Metadata,
        lease_secs: u32,
    ) -> Result<(), RegistryError> {
        if lease_secs == 0 {
            return Err(RegistryError::InvalidLease);
        }
        let req = RegistryRequest::Register {
            name: name.to_owned(),
            address,
            metadata,
            lease_secs,
        };
        match self.request(&req)? {
            RegistryResponse::Registered => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn renew(&self, name: &str, lease_secs: u32) -> Result<(), RegistryError> {
        let req = RegistryRequest::Renew {
            name: name.to_owned(),
            lease_secs,
        };
        match self.request(&req)? {
            RegistryResponse::Renewed => Ok(()),
            RegistryResponse::UnknownService => Err(RegistryError::UnknownService(name.to_owned())),
            other => Err(unexpected(&other)),
        }
    }

    fn lookup(&self, name: &str) -> Result<Option<ServiceRecord>, RegistryError> {
        let req = RegistryRequest::Lookup {
            name: name.to_owned(),
        };
        match self.request(&req)? {
            RegistryResponse::Found(record) => Ok(Some(record)),
            RegistryResponse::NotFound => Ok(None),
            other => Err(unexpected(&other)),
        }
    }

    fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        let req = RegistryRequest::Deregister {
            name: name.to_owned(),
        };
        match self.request(&req)? {
            RegistryResponse::Deregistered => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Lease keeper
// ---------------------------------------------------------------------------

/// What a lease keeper registers.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub address: ServiceAddress,
    pub metadata: Metadata,
    pub lease_secs: u32,
}

/// Keeps one registration alive from a background thread.
///
/// Renews at a third of the lease so two consecutive misses still leave the
/// entry live. If the registry has forgotten the name (restart, expiry) it
/// registers again. Dropping the keeper deregisters the service.
pub struct LeaseKeeper {
    name: String,
    directory: Arc<dyn Directory>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

const KEEPER_POLL: Duration = Duration::from_millis(50);

impl LeaseKeeper {
    /// Register now, then keep renewing.
    pub fn start(
        directory: Arc<dyn Directory>,
        registration: Registration,
    ) -> Result<Self, RegistryError> {
        directory.register(
            &registration.name,
            registration.address.clone(),
            registration.metadata.clone(),
            registration.lease_secs,
        )?;

        let stop = Arc::new(AtomicBool::new(false));
        let name = registration.name.clone();
        let thread_stop = Arc::clone(&stop);
        let thread_dir = Arc::clone(&directory);
        let handle = thread::Builder::new()
            .name(format!("lease-{name}"))
            .spawn(move || keep_alive(thread_dir.as_ref(), &registration, &thread_stop))
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        Ok(Self {
            name,
            directory,
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("LEASE {}: keeper thread panicked", self.name);
            }
            if let Err(e) = self.directory.deregister(&self.name) {
                warn!("LEASE {}: deregister failed: {e}", self.name);
            }
        }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn keep_alive(directory: &dyn Directory, reg: &Registration, stop: &AtomicBool) {
    let period = Duration::from_secs(u64::from(reg.lease_secs)) / 3;
    let mut next = Instant::now() + period;

    while !stop.load(Ordering::Acquire) {
        if Instant::now() < next {
            thread::sleep(KEEPER_POLL);
            continue;
        }
        next = Instant::now() + period;

        match directory.renew(&reg.name, reg.lease_secs) {
            Ok(()) => debug!("LEASE {}: renewed", reg.name),
            Err(RegistryError::UnknownService(_)) => {
                info!("LEASE {}: registry forgot us, re-registering", reg.name);
                if let Err(e) = directory.register(
                    &reg.name,
                    reg.address.clone(),
                    reg.metadata.clone(),
                    reg.lease_secs,
                ) {
                    warn!("LEASE {}: re-register failed: {e}", reg.name);
                }
            }
            Err(e) => warn!("LEASE {}: renew failed: {e}", reg.name),
        }
    }
}
