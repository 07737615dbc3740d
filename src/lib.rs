//! Nightwatch observatory controller library.
//!
//! Exposes every subsystem for integration testing and for hosts that
//! embed the controller rather than running the bundled binary.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod clock;
pub mod config;
pub mod control;
pub mod devices;
pub mod error;
pub mod fsm;
pub mod registry;
pub mod rpc;
pub mod safety;
pub mod sensors;
pub mod solar;

pub use error::{Error, Result};
