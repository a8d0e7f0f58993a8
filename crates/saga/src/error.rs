//! Saga error types.

use common::EntityId;
use domain::DomainError;
use messaging::ChannelError;
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: SagaStatus },

    /// A saga instance for this entity is still running.
    #[error("Saga {saga_type} already running for {correlation_id}")]
    AlreadyStarted {
        saga_type: &'static str,
        correlation_id: EntityId,
    },

    /// The saga record was modified by someone else since it was loaded.
    #[error(
        "Concurrency conflict for saga {saga_type}/{correlation_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        saga_type: String,
        correlation_id: EntityId,
        expected: u64,
        actual: u64,
    },

    /// Orchestrator configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Credentials store error.
    #[error("Credentials store error: {0}")]
    CredentialsStore(String),

    /// Profile store error.
    #[error("Profile store error: {0}")]
    ProfileStore(String),

    /// Social graph store error.
    #[error("Graph store error: {0}")]
    GraphStore(String),

    /// Engagement event log or report store error.
    #[error("Engagement store error: {0}")]
    EngagementStore(String),

    /// Message channel error.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Domain validation error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error from the saga repository.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
