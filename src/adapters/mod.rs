//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter       | Implements        | Connects to                 |
//! |---------------|-------------------|-----------------------------|
//! | `config_file` | ConfigPort        | JSON document on disk       |
//! | `log_sink`    | EventSink         | `log` output                |
//! | `sim`         | DeviceService     | in-process simulated devices|
//! |               | TargetScheduler   | fixed target list           |

pub mod config_file;
pub mod log_sink;
pub mod sim;
