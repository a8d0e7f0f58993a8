//! Hooks invoked when a saga instance reaches a terminal state.

use async_trait::async_trait;

use crate::instance::SagaInstance;

/// Receives terminal saga instances.
///
/// This is where alerting or manual-intervention workflows plug in, for
/// example when a compensation step itself failed.
#[async_trait]
pub trait SagaListener: Send + Sync {
    async fn on_completed(&self, _instance: &SagaInstance) {}

    async fn on_failed(&self, _instance: &SagaInstance) {}

    async fn on_aborted(&self, _instance: &SagaInstance) {}
}

/// Listener that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

#[async_trait]
impl SagaListener for LoggingListener {
    async fn on_completed(&self, instance: &SagaInstance) {
        tracing::info!(
            saga_type = instance.saga_type(),
            correlation_id = %instance.correlation_id(),
            "saga completed"
        );
    }

    async fn on_failed(&self, instance: &SagaInstance) {
        tracing::warn!(
            saga_type = instance.saga_type(),
            correlation_id = %instance.correlation_id(),
            reason = instance.failure_reason().unwrap_or("unknown"),
            completed = ?instance.completed_steps(),
            compensated = ?instance.compensated_steps(),
            "saga failed"
        );
    }

    async fn on_aborted(&self, instance: &SagaInstance) {
        tracing::error!(
            saga_type = instance.saga_type(),
            correlation_id = %instance.correlation_id(),
            reason = instance.failure_reason().unwrap_or("unknown"),
            "saga aborted"
        );
    }
}
