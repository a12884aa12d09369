//! Hulse Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Runtime specifics
//!
//! All types here describe what travels between a consumer, the Hulse
//! stream server and a producer host.

pub mod cluster;
pub mod error;
pub mod ids;
pub mod login;
pub mod task;

// Re-export commonly used types
pub use cluster::Cluster;
pub use error::CoreError;
pub use ids::QueryId;
pub use login::LoginCallback;
pub use task::{TaskData, TaskKind, TaskRequest, TaskResult, SUPPORTED_TASKS};
