//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a subsystem against the
//! mock observatory or real loopback sockets. No hardware required.

mod control_loop_tests;
mod mock_observatory;
mod network_tests;
mod runner_tests;
