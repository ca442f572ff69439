//! Error types for speclooper
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::domain::ProjectId;

/// All error types that can occur while controlling build loops
#[derive(Debug, Error)]
pub enum LoopError {
    /// A loop is already supervised (or persisted as running) for this project
    #[error("Loop already running for project: {0}")]
    AlreadyRunning(ProjectId),

    /// No loop is currently supervised for this project
    #[error("No loop running for project: {0}")]
    NotRunning(ProjectId),

    /// The iteration step collaborator failed
    #[error("Iteration step failed: {0}")]
    StepFailed(String),

    /// Backlog could not be read or parsed
    #[error("Backlog error: {0}")]
    Backlog(String),

    /// Agent subprocess could not be spawned or driven
    #[error("Agent error: {0}")]
    Agent(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for speclooper operations
pub type Result<T> = std::result::Result<T, LoopError>;
