//! PostgreSQL saga repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EntityId;
use sqlx::{PgPool, Row, postgres::PgRow};

use super::SagaRepository;
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::state::SagaStatus;

/// PostgreSQL-backed saga repository.
///
/// Each instance is one row; the full record lives in a JSONB column while
/// `status` and `deadline` are kept as columns for the sweeper's queries.
#[derive(Clone)]
pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_instance(row: PgRow) -> Result<SagaInstance> {
        let version: i64 = row.try_get("version")?;
        let data: serde_json::Value = row.try_get("data")?;
        let mut instance: SagaInstance = serde_json::from_value(data)?;
        instance.set_version(version as u64);
        Ok(instance)
    }

    async fn current_version(&self, saga_type: &str, correlation_id: EntityId) -> Result<u64> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM saga_instances WHERE saga_type = $1 AND correlation_id = $2",
        )
        .bind(saga_type)
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(version.unwrap_or(0) as u64)
    }
}

#[async_trait]
impl SagaRepository for PostgresSagaRepository {
    async fn save(&self, instance: &SagaInstance, expected_version: u64) -> Result<u64> {
        let version = expected_version + 1;
        let mut stored = instance.clone();
        stored.set_version(version);
        let data = serde_json::to_value(&stored)?;
        let deadline = instance.pending().map(|p| p.deadline);

        let result = if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO saga_instances
                    (saga_type, correlation_id, version, status, deadline, data, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (saga_type, correlation_id) DO NOTHING
                "#,
            )
            .bind(instance.saga_type())
            .bind(instance.correlation_id().as_uuid())
            .bind(version as i64)
            .bind(instance.status().as_str())
            .bind(deadline)
            .bind(&data)
            .bind(instance.created_at())
            .bind(instance.updated_at())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE saga_instances
                SET version = $3, status = $4, deadline = $5, data = $6,
                    created_at = $7, updated_at = $8
                WHERE saga_type = $1 AND correlation_id = $2 AND version = $9
                "#,
            )
            .bind(instance.saga_type())
            .bind(instance.correlation_id().as_uuid())
            .bind(version as i64)
            .bind(instance.status().as_str())
            .bind(deadline)
            .bind(&data)
            .bind(instance.created_at())
            .bind(instance.updated_at())
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            let actual = self
                .current_version(instance.saga_type(), instance.correlation_id())
                .await?;
            return Err(SagaError::ConcurrencyConflict {
                saga_type: instance.saga_type().to_string(),
                correlation_id: instance.correlation_id(),
                expected: expected_version,
                actual,
            });
        }

        Ok(version)
    }

    async fn get(
        &self,
        saga_type: &str,
        correlation_id: EntityId,
    ) -> Result<Option<SagaInstance>> {
        let row = sqlx::query(
            "SELECT version, data FROM saga_instances WHERE saga_type = $1 AND correlation_id = $2",
        )
        .bind(saga_type)
        .bind(correlation_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_instance).transpose()
    }

    async fn find_active(&self, saga_type: &str) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT version, data FROM saga_instances
            WHERE saga_type = $1 AND status IN ($2, $3)
            ORDER BY created_at ASC
            "#,
        )
        .bind(saga_type)
        .bind(SagaStatus::Running.as_str())
        .bind(SagaStatus::Compensating.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_instance).collect()
    }

    async fn find_overdue(
        &self,
        saga_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SagaInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT version, data FROM saga_instances
            WHERE saga_type = $1 AND status IN ($2, $3) AND deadline <= $4
            ORDER BY deadline ASC
            "#,
        )
        .bind(saga_type)
        .bind(SagaStatus::Running.as_str())
        .bind(SagaStatus::Compensating.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_instance).collect()
    }
}
