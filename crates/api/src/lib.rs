//! HTTP surface over the store and registry.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};
