//! The in-memory task registry: the set of task definitions the platform can
//! execute. Read-only at runtime; built once at startup.

pub mod builtin;
pub mod params;
pub mod registry;

pub use registry::{schema_hash, Registry, TaskSpec};
