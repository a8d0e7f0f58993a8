//! Background task that recovers and times out saga instances.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::definition::SagaDefinition;
use crate::error::Result;
use crate::orchestrator::{Orchestrator, SweepReport};

/// An orchestrator as seen by the sweeper, independent of saga type.
#[async_trait]
pub trait Sweepable: Send + Sync {
    fn saga_type(&self) -> &'static str;

    async fn recover(&self) -> Result<usize>;

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport>;
}

#[async_trait]
impl<D: SagaDefinition> Sweepable for Orchestrator<D> {
    fn saga_type(&self) -> &'static str {
        D::SAGA_TYPE
    }

    async fn recover(&self) -> Result<usize> {
        Orchestrator::recover(self).await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        Orchestrator::sweep(self, now).await
    }
}

/// Periodically sweeps a set of orchestrators.
pub struct SagaSweeper {
    orchestrators: Vec<Arc<dyn Sweepable>>,
    interval: Duration,
}

impl SagaSweeper {
    pub fn new(interval: Duration) -> Self {
        Self {
            orchestrators: Vec::new(),
            interval,
        }
    }

    pub fn with(mut self, orchestrator: Arc<dyn Sweepable>) -> Self {
        self.orchestrators.push(orchestrator);
        self
    }

    /// Sweeps every orchestrator once and returns the combined report.
    ///
    /// An error from one orchestrator is logged and does not stop the others.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut total = SweepReport::default();
        for orchestrator in &self.orchestrators {
            match orchestrator.sweep(now).await {
                Ok(report) => {
                    total.retried += report.retried;
                    total.failed += report.failed;
                }
                Err(e) => {
                    tracing::error!(
                        saga_type = orchestrator.saga_type(),
                        error = %e,
                        "sweep failed"
                    );
                }
            }
        }
        total
    }

    /// Recovers pending commands, then sweeps on every tick until
    /// `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        for orchestrator in &self.orchestrators {
            if let Err(e) = orchestrator.recover().await {
                tracing::error!(
                    saga_type = orchestrator.saga_type(),
                    error = %e,
                    "recovery failed"
                );
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "saga sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once(Utc::now()).await;
                    if report != SweepReport::default() {
                        tracing::info!(
                            retried = report.retried,
                            failed = report.failed,
                            "sweep finished"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("saga sweeper stopped");
    }
}
