//! How a command reaches a device service.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{DeviceCommand, DeviceReply, DeviceRequest, DeviceResponse};
use crate::error::DeviceFailure;
use crate::registry::ServiceAddress;
use crate::rpc::codec::{self, WireError};

/// Port for the call itself. The proxy handles resolution and error
/// mapping; a transport only moves one request and one reply.
pub trait DeviceTransport: Send + Sync {
    fn call(
        &self,
        address: &ServiceAddress,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> Result<DeviceReply, DeviceFailure>;
}

/// One TCP connection per call, framed like the registry protocol.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDeviceTransport;

impl From<WireError> for DeviceFailure {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Timeout => Self::Timeout,
            WireError::Decode(e) => Self::Protocol(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl DeviceTransport for TcpDeviceTransport {
    fn call(
        &self,
        address: &ServiceAddress,
        command: &DeviceCommand,
        timeout: Duration,
    ) -> Result<DeviceReply, DeviceFailure> {
        let addr = (address.host.as_str(), address.port)
            .to_socket_addrs()
            .map_err(|e| DeviceFailure::Transport(e.to_string()))?
            .next()
            .ok_or_else(|| DeviceFailure::Transport(format!("cannot resolve {address}")))?;

        let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                DeviceFailure::Timeout
            } else {
                DeviceFailure::Transport(e.to_string())
            }
        })?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| DeviceFailure::Transport(e.to_string()))?;

        codec::write_message(
            &mut stream,
            &DeviceRequest {
                command: command.clone(),
            },
        )?;
        match codec::read_message(&mut stream)? {
            DeviceResponse::Ok(reply) => Ok(reply),
            DeviceResponse::Fault { message } => Err(DeviceFailure::Remote(message)),
        }
    }
}
