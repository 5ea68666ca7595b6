//! SQLite-backed store: the single source of truth shared by the API,
//! workers, scheduler and reaper.

pub mod sqlite;

pub use sqlite::{
    DatabaseManager, SqliteArtifactStore, SqliteCronStore, SqliteEventStore, SqliteRunStore,
    SqliteWorkerStore,
};
