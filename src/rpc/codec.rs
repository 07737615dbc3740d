//! Length-prefix frame codec.
//!
//! Wire format:
//! ```text
//! ┌────────────┬──────────────────────────┐
//! │ Length (4B)│ postcard payload (N B)   │
//! │ LE u32     │                          │
//! └────────────┴──────────────────────────┘
//! ```
//!
//! Used by both the registry protocol and device calls. Reads are blocking
//! and rely on the socket's read timeout to bound them.

use std::fmt;
use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum frame payload size (protects against memory exhaustion).
pub const MAX_FRAME_SIZE: usize = 4096;

/// Frame header size (4-byte little-endian length).
const HEADER_SIZE: usize = 4;

#[derive(Debug)]
pub enum WireError {
    /// Peer closed the connection before a header arrived.
    Closed,
    /// Socket read or write timed out.
    Timeout,
    Io(io::Error),
    /// Header announced zero bytes or more than [`MAX_FRAME_SIZE`].
    BadLength(usize),
    Encode(postcard::Error),
    Decode(postcard::Error),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Timeout => write!(f, "timed out"),
            Self::Io(e) => write!(f, "io: {e}"),
            Self::BadLength(n) => write!(f, "bad frame length {n}"),
            Self::Encode(e) => write!(f, "encode: {e}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Io(e),
        }
    }
}

/// Encode a payload into a length-prefixed frame.
///
/// Returns `None` if the payload is empty or exceeds [`MAX_FRAME_SIZE`].
pub fn encode_frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return None;
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    Some(frame)
}

/// Serialize `msg` and write it as one frame.
pub fn write_message<W: Write, T: Serialize>(w: &mut W, msg: &T) -> Result<(), WireError> {
    let payload = postcard::to_allocvec(msg).map_err(WireError::Encode)?;
    let frame = encode_frame(&payload).ok_or(WireError::BadLength(payload.len()))?;
    w.write_all(&frame)?;
    w.flush()?;
    Ok(())
}

/// Read one frame and deserialize it.
pub fn read_message<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<T, WireError> {
    let mut header = [0u8; HEADER_SIZE];
    r.read_exact(&mut header)?;

    let len = u32::from_le_bytes(header) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(WireError::BadLength(len));
    }

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    postcard::from_bytes(&payload).map_err(WireError::Decode)
}
