//! Framed request/response plumbing shared by the registry and devices.
//!
//! ```text
//! ┌──────────────┐  frame  ┌──────────────┐  frame  ┌──────────────┐
//! │ client call  │────────▶│ FrameListener│────────▶│   handler    │
//! │ (codec)      │◀────────│ (per-conn)   │◀────────│ Req → Resp   │
//! └──────────────┘         └──────────────┘         └──────────────┘
//! ```

pub mod codec;
pub mod listener;
