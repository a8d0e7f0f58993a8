//! Persistence of saga instances.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EntityId;

use crate::error::Result;
use crate::instance::SagaInstance;

pub use memory::InMemorySagaRepository;
pub use postgres::PostgresSagaRepository;

/// Durable storage for [`SagaInstance`] records.
///
/// Saves are conditional on the stored version: `expected_version` must
/// match the version currently stored (0 for "no record yet"), otherwise
/// the save fails with [`SagaError::ConcurrencyConflict`](crate::SagaError).
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Stores the instance and returns its new version.
    async fn save(&self, instance: &SagaInstance, expected_version: u64) -> Result<u64>;

    async fn get(&self, saga_type: &str, correlation_id: EntityId)
    -> Result<Option<SagaInstance>>;

    /// Returns every instance of `saga_type` that still expects replies.
    async fn find_active(&self, saga_type: &str) -> Result<Vec<SagaInstance>>;

    /// Returns active instances whose pending command's deadline is at or
    /// before `now`.
    async fn find_overdue(&self, saga_type: &str, now: DateTime<Utc>)
    -> Result<Vec<SagaInstance>>;
}
