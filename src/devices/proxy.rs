//! Device proxy: resolve by name, call with a timeout, map errors.
//!
//! Resolution retries `NotFound` with exponential backoff (doubling from
//! `backoff_initial_ms`, capped at `backoff_max_ms`) until the resolve
//! deadline, then gives up with `ServiceUnavailable`. The proxy holds no
//! business logic and never swallows a failure.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::transport::DeviceTransport;
use super::{DeviceBinding, DeviceCommand, DeviceReply};
use crate::clock::{Clock, SystemClock};
use crate::error::{DeviceError, Error, Result};
use crate::registry::{Directory, ServiceAddress};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Total time allowed to find a service in the registry.
    pub resolve_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Default per-call timeout for device operations.
    pub call_timeout_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            resolve_timeout_ms: 5_000,
            backoff_initial_ms: 100,
            backoff_max_ms: 2_000,
            call_timeout_ms: 30_000,
        }
    }
}

pub struct DeviceProxy {
    directory: Arc<dyn Directory>,
    transport: Arc<dyn DeviceTransport>,
    /// Paces resolution retries.
    clock: Arc<dyn Clock>,
    resolve_timeout: Duration,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl DeviceProxy {
    pub fn new(
        directory: Arc<dyn Directory>,
        transport: Arc<dyn DeviceTransport>,
        config: &ProxyConfig,
    ) -> Self {
        Self {
            directory,
            transport,
            clock: Arc::new(SystemClock),
            resolve_timeout: Duration::from_millis(config.resolve_timeout_ms),
            backoff_initial: Duration::from_millis(config.backoff_initial_ms.max(1)),
            backoff_max: Duration::from_millis(config.backoff_max_ms.max(config.backoff_initial_ms)),
        }
    }

    /// Use `clock` for the resolve deadline and backoff waits.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Look `service` up, retrying until the resolve deadline.
    pub fn resolve(&self, service: &str) -> Result<ServiceAddress> {
        let deadline = self.clock.now() + self.resolve_timeout;
        let mut backoff = self.backoff_initial;
        let mut attempt = 1u32;

        loop {
            match self.directory.lookup(service) {
                Ok(Some(record)) => {
                    if attempt > 1 {
                        info!("PROXY: resolved {service} after {attempt} attempts");
                    }
                    return Ok(record.address);
                }
                Ok(None) => debug!("PROXY: {service} not registered (attempt {attempt})"),
                Err(e) => warn!("PROXY: lookup of {service} failed: {e}"),
            }

            let now = self.clock.now();
            if now >= deadline {
                warn!("PROXY: {service} unavailable after {attempt} attempts");
                return Err(Error::ServiceUnavailable {
                    service: service.to_owned(),
                });
            }
            self.clock.sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(self.backoff_max);
            attempt += 1;
        }
    }

    /// Resolve `service` and run `command` on it.
    pub fn invoke(
        &self,
        service: &str,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> Result<DeviceReply> {
        let address = self.resolve(service)?;
        self.call(service, &address, command, timeout)
    }

    /// Like [`invoke`](Self::invoke), but a binding with a fixed address
    /// skips the registry.
    pub fn invoke_binding(
        &self,
        binding: &DeviceBinding,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> Result<DeviceReply> {
        if !command.supported_by(binding.kind) {
            return Err(Error::UnsupportedOperation {
                device: binding.role.clone(),
                operation: command.operation(),
            });
        }
        match &binding.address {
            Some(address) => self.call(&binding.service, address, command, timeout),
            None => self.invoke(&binding.service, command, timeout),
        }
    }

    fn call(
        &self,
        service: &str,
        address: &ServiceAddress,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> Result<DeviceReply> {
        let operation = command.operation();
        debug!("PROXY: {service}.{operation} -> {address}");
        self.transport
            .call(address, command, timeout)
            .map_err(|cause| {
                warn!("PROXY: {service}.{operation} failed: {cause}");
                Error::Device(DeviceError {
                    service: service.to_owned(),
                    operation,
                    cause,
                })
            })
    }
}
