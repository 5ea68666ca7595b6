//! Core domain model for TaskHub: runs, events, artifacts, workers and cron
//! entries, plus the repository seams the store implements.

pub mod entities;
pub mod repositories;

pub use entities::{
    Artifact, CronEntry, EventPage, ExpiredLease, RegistrySnapshot, Run, RunEvent, RunFilter,
    RunStatus, TaskDescriptor, WorkerInfo, WorkerStatus,
};
pub use repositories::{
    ArtifactRepository, CronRepository, EventRepository, RunRepository, WorkerRepository,
};
