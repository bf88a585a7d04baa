//! sitesync daemon: process lifecycle, scheduler loop and hook-based sync invoker.

mod error;
pub mod hooks;
pub mod lifecycle;
pub mod log_rotation;
pub mod paths;
pub mod process;
mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use hooks::CommandInvoker;
pub use lifecycle::{cleanup_and_die, restart, start, stop, StartOptions, StopOutcome};
pub use process::{process_alive, read_pidfile};
pub use runtime::{init_tracing, run_until_shutdown, serve, LogFormat};
pub use scheduler::Scheduler;
