//! Registry wire messages.
//!
//! Each request is one frame (see [`crate::rpc::codec`]) answered by
//! exactly one response frame on the same connection.

use serde::{Deserialize, Serialize};

use super::{Metadata, Registry, RegistryError, ServiceAddress, ServiceRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryRequest {
    Register {
        name: String,
        address: ServiceAddress,
        metadata: Metadata,
        lease_secs: u32,
    },
    Renew {
        name: String,
        lease_secs: u32,
    },
    Lookup {
        name: String,
    },
    Deregister {
        name: String,
    },
    List,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryResponse {
    Registered,
    Renewed,
    Found(ServiceRecord),
    NotFound,
    UnknownService,
    Deregistered,
    Entries(Vec<ServiceRecord>),
    Pong,
    Rejected(String),
}

/// Apply one request to the registry.
pub fn handle(registry: &Registry, request: RegistryRequest) -> RegistryResponse {
    match request {
        RegistryRequest::Register {
            name,
            address,
            metadata,
            lease_secs,
        } => match registry.register(&name, address, metadata, lease_secs) {
            Ok(()) => RegistryResponse::Registered,
            Err(e) => RegistryResponse::Rejected(e.to_string()),
        },
        RegistryRequest::Renew { name, lease_secs } => match registry.renew(&name, lease_secs) {
            Ok(()) => RegistryResponse::Renewed,
            Err(RegistryError::UnknownService(_)) => RegistryResponse::UnknownService,
            Err(e) => RegistryResponse::Rejected(e.to_string()),
        },
        RegistryRequest::Lookup { name } => match registry.lookup(&name) {
            Some(record) => RegistryResponse::Found(record),
            None => RegistryResponse::NotFound,
        },
        RegistryRequest::Deregister { name } => {
            registry.deregister(&name);
            RegistryResponse::Deregistered
        }
        RegistryRequest::List => RegistryResponse::Entries(registry.list()),
        RegistryRequest::Ping => RegistryResponse::Pong,
    }
}
