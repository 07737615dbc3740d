//! Service registry: a name → address directory with leases.
//!
//! ```text
//!  DeviceServer ──register/renew──▶ ┌──────────────────────────┐
//!                                   │ Registry                 │
//!  DeviceProxy ──────lookup───────▶ │  entries: DashMap        │
//!                                   │  expiries: BTreeSet      │
//!  sweeper thread ────sweep───────▶ │   (Instant, name)        │
//!                                   └──────────────────────────┘
//! ```
//!
//! An entry is live while `now < expires_at`. Lookups check the expiry
//! themselves, so an expired entry is invisible even before the sweeper
//! gets to it. The expiry index lets `sweep` visit only the entries that
//! are due. Index items can be stale (renewed or deregistered entries);
//! `sweep` re-checks the entry under its shard lock before removing it.

pub mod client;
pub mod protocol;
pub mod server;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

pub use client::{LeaseKeeper, RegistryClient, Registration};
pub use server::RegistryServer;

/// Free-form service metadata.
pub type Metadata = BTreeMap<String, String>;

/// Where a service listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub host: String,
    pub port: u16,
}

impl ServiceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A live registration as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub address: ServiceAddress,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live entry under this name.
    UnknownService(String),
    /// Lease length of zero.
    InvalidLease,
    /// Could not reach the registry.
    Transport(String),
    /// The registry answered with something unexpected.
    Rejected(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownService(name) => write!(f, "unknown service '{name}'"),
            Self::InvalidLease => write!(f, "lease must be at least one second"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Rejected(msg) => write!(f, "rejected: {msg}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Anything that can register and resolve services: the in-process
/// [`Registry`] or a [`RegistryClient`] talking to a remote one.
pub trait Directory: Send + Sync {
    fn register(
        &self,
        name: &str,
        address: ServiceAddress,
        metadata: Metadata,
        lease_secs: u32,
    ) -> Result<(), RegistryError>;

    fn renew(&self, name: &str, lease_secs: u32) -> Result<(), RegistryError>;

    /// `Ok(None)` when no live entry exists.
    fn lookup(&self, name: &str) -> Result<Option<ServiceRecord>, RegistryError>;

    fn deregister(&self, name: &str) -> Result<(), RegistryError>;
}

// ---------------------------------------------------------------------------
// In-process registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    record: ServiceRecord,
    expires_at: Instant,
}

pub struct Registry {
    entries: DashMap<String, Entry>,
    expiries: Mutex<BTreeSet<(Instant, String)>>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            expiries: Mutex::new(BTreeSet::new()),
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn index(&self, expires_at: Instant, name: &str) {
        self.expiries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((expires_at, name.to_owned()));
    }

    /// Register or replace. Last writer wins.
    pub fn register(
        &self,
        name: &str,
        address: ServiceAddress,
        metadata: Metadata,
        lease_secs: u32,
    ) -> Result<(), RegistryError> {
        if lease_secs == 0 {
            return Err(RegistryError::InvalidLease);
        }
        let expires_at = self.clock.now() + Duration::from_secs(u64::from(lease_secs));
        info!("REGISTRY: register {name} at {address} (lease {lease_secs}s)");
        self.entries.insert(
            name.to_owned(),
            Entry {
                record: ServiceRecord {
                    name: name.to_owned(),
                    address,
                    metadata,
                },
                expires_at,
            },
        );
        self.index(expires_at, name);
        Ok(())
    }

    /// Extend a live lease to `now + lease_secs`.
    pub fn renew(&self, name: &str, lease_secs: u32) -> Result<(), RegistryError> {
        if lease_secs == 0 {
            return Err(RegistryError::InvalidLease);
        }
        let expires_at = {
            let mut entry = self
                .entries
                .get_mut(name)
                .ok_or_else(|| RegistryError::UnknownService(name.to_owned()))?;
            // `now` is read under the shard lock so concurrent renewals
            // apply in clock order.
            let now = self.clock.now();
            if entry.expires_at <= now {
                return Err(RegistryError::UnknownService(name.to_owned()));
            }
            entry.expires_at = now + Duration::from_secs(u64::from(lease_secs));
            entry.expires_at
        };
        self.index(expires_at, name);
        debug!("REGISTRY: renewed {name}");
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<ServiceRecord> {
        let now = self.clock.now();
        self.entries
            .get(name)
            .filter(|e| e.expires_at > now)
            .map(|e| e.record.clone())
    }

    /// Idempotent.
    pub fn deregister(&self, name: &str) {
        if self.entries.remove(name).is_some() {
            info!("REGISTRY: deregistered {name}");
        }
    }

    /// Remove every entry with `expires_at <= now`. Returns how many went.
    pub fn sweep(&self, now: Instant) -> usize {
        let due: Vec<(Instant, String)> = {
            let mut index = self
                .expiries
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let due: Vec<_> = index
                .iter()
                .take_while(|(at, _)| *at <= now)
                .cloned()
                .collect();
            for item in &due {
                index.remove(item);
            }
            due
        };

        let removed = due
            .iter()
            .filter(|(_, name)| {
                self.entries
                    .remove_if(name.as_str(), |_, e| e.expires_at <= now)
                    .is_some()
            })
            .count();
        if removed > 0 {
            info!("REGISTRY: auto-clean removed {removed} expired entries");
        }
        removed
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep(self.clock.now())
    }

    /// Live entries, sorted by name.
    pub fn list(&self) -> Vec<ServiceRecord> {
        let now = self.clock.now();
        let mut live: Vec<ServiceRecord> = self
            .entries
            .iter()
            .filter(|e| e.expires_at > now)
            .map(|e| e.record.clone())
            .collect();
        live.sort_by(|a, b| a.name.cmp(&b.name));
        live
    }

    /// Entries still stored, live or not.
    pub fn stored(&self) -> usize {
        self.entries.len()
    }
}

impl Directory for Registry {
    fn register(
        &self,
        name: &str,
        address: ServiceAddress,
        metadata: Metadata,
        lease_secs: u32,
    ) -> Result<(), RegistryError> {
        Registry::register(self, name, address, metadata, lease_secs)
    }

    fn renew(&self, name: &str, lease_secs: u32) -> Result<(), RegistryError> {
        Registry::renew(self, name, lease_secs)
    }

    fn lookup(&self, name: &str) -> Result<Option<ServiceRecord>, RegistryError> {
        Ok(Registry::lookup(self, name))
    }

    fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        Registry::deregister(self, name);
        Ok(())
    }
}
