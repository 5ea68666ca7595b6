//! The worker: claims runs from the store, supervises one child process at a
//! time in its own process group, and streams the child's output into the
//! event log.

pub mod service;
pub mod stream;
pub mod supervisor;
pub mod wire;

pub use service::{WorkerConfig, WorkerService};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorOutcome};
