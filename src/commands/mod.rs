//! CLI command implementations
//!
//! Device commands run against a [`nandprog_serial::Programmer`]; `emulate`
//! serves the device side itself over TCP.

mod emulate;
mod erase;
mod host;
mod list;
mod read;
mod status;
mod write;

pub use emulate::run_emulate;
pub use erase::run_erase;
pub use host::{connect, ensure_chip, host_config, load_registry};
pub use list::list_chips;
pub use read::run_read;
pub use status::run_status;
pub use write::run_write;

/// Result of a command
pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;
