//! Application wiring and lifecycle management.

mod init;
mod monitor;
mod signals;

pub use init::run_bridge;
