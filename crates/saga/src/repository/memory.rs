//! In-memory saga repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EntityId;
use tokio::sync::RwLock;

use super::SagaRepository;
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;

/// In-memory saga repository for tests and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemorySagaRepository {
    instances: Arc<RwLock<HashMap<(String, EntityId), SagaInstance>>>,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored instances.
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn save(&self, instance: &SagaInstance, expected_version: u64) -> Result<u64> {
        let key = (instance.saga_type().to_string(), instance.correlation_id());
        let mut instances = self.instances.write().await;

        let actual = instances.get(&key).map(|i| i.version()).unwrap_or(0);
        if actual != expected_version {
            return Err(SagaError::ConcurrencyConflict {
                saga_type: key.0,
                correlation_id: key.1,
                expected: expected_version,
                actual,
            });
        }

        let version = expected_version + 1;
        let mut stored = instance.clone();
        stored.set_version(version);
        instances.insert(key, stored);
        Ok(version)
    }

    async fn get(
        &self,
        saga_type: &str,
        correlation_id: EntityId,
    ) -> Result<Option<SagaInstance>> {
        Ok(self
            .instances
            .read()
            .await
            .get(&(saga_type.to_string(), correlation_id))
            .cloned())
    }

    async fn find_active(&self, saga_type: &str) -> Result<Vec<SagaInstance>> {
        let mut active: Vec<SagaInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.saga_type() == saga_type && i.status().is_active())
            .cloned()
            .collect();
        active.sort_by_key(|i| i.created_at());
        Ok(active)
    }

    async fn find_overdue(
        &self,
        saga_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SagaInstance>> {
        let mut overdue: Vec<SagaInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|i| i.saga_type() == saga_type && i.is_overdue(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|i| i.pending().map(|p| p.deadline));
        Ok(overdue)
    }
}
