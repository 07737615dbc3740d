//! Hosting side of a device: serve one [`DeviceService`] over TCP and keep
//! it registered.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use log::{info, warn};

use super::{DeviceCommand, DeviceKind, DeviceReply, DeviceRequest, DeviceResponse};
use crate::registry::{Directory, LeaseKeeper, Metadata, Registration, ServiceAddress};
use crate::rpc::listener::FrameListener;

/// A device implementation (hardware driver or simulator).
pub trait DeviceService: Send {
    fn kind(&self) -> DeviceKind;

    /// Run one command. `Err` carries a message for the caller.
    fn handle(&mut self, command: &DeviceCommand) -> Result<DeviceReply, String>;
}

/// Dispatch one request, rejecting commands the service's kind can't run.
pub fn dispatch(service: &mut dyn DeviceService, request: DeviceRequest) -> DeviceResponse {
    let kind = service.kind();
    if !request.command.supported_by(kind) {
        return DeviceResponse::Fault {
            message: format!(
                "{} does not support '{}'",
                kind.as_str(),
                request.command.operation()
            ),
        };
    }
    match service.handle(&request.command) {
        Ok(reply) => DeviceResponse::Ok(reply),
        Err(message) => DeviceResponse::Fault { message },
    }
}

pub struct DeviceServer {
    name: String,
    listener: FrameListener,
    lease: LeaseKeeper,
}

impl DeviceServer {
    /// Bind `bind_addr`, serve `service`, and register as `name` at
    /// `advertise_host:<bound port>`.
    pub fn start(
        name: &str,
        service: Box<dyn DeviceService>,
        bind_addr: &str,
        advertise_host: &str,
        directory: Arc<dyn Directory>,
        lease_secs: u32,
    ) -> io::Result<Self> {
        let kind = service.kind();
        let service = Arc::new(Mutex::new(service));
        let served = Arc::clone(&service);
        let listener = FrameListener::bind("DEVICE", bind_addr, move |req: DeviceRequest| {
            let mut guard = served.lock().unwrap_or_else(PoisonError::into_inner);
            dispatch(guard.as_mut(), req)
        })?;

        let mut metadata = Metadata::new();
        metadata.insert("kind".into(), kind.as_str().into());
        let registration = Registration {
            name: name.to_owned(),
            address: ServiceAddress::new(advertise_host, listener.local_addr().port()),
            metadata,
            lease_secs,
        };
        let lease = LeaseKeeper::start(directory, registration)
            .map_err(|e| io::Error::other(e.to_string()))?;

        info!("DEVICE {name}: {} service up on {}", kind.as_str(), listener.local_addr());
        Ok(Self {
            name: name.to_owned(),
            listener,
            lease,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Deregister, then stop serving.
    pub fn shutdown(mut self) {
        self.lease.stop();
        self.listener.shutdown();
        info!("DEVICE {}: stopped", self.name);
    }
}

impl Drop for DeviceServer {
    fn drop(&mut self) {
        self.lease.stop();
        self.listener.shutdown();
    }
}
