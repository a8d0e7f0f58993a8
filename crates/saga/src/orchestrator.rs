//! The saga orchestrator: starts sagas and reacts to replies.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use common::EntityId;
use messaging::{Message, MessageChannelExt, MessageHandler, SharedChannel, SubscriptionId};
use tokio::sync::Mutex;

use crate::definition::{ReplyOutcome, SagaDefinition, StepType};
use crate::error::{Result, SagaError};
use crate::events::SagaEvent;
use crate::instance::SagaInstance;
use crate::listener::{LoggingListener, SagaListener};
use crate::message::{Command, Reply, SagaSubjects};
use crate::repository::SagaRepository;
use crate::state::SagaStatus;

/// Tuning knobs for an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a command may go unanswered before the sweeper acts.
    pub step_timeout: Duration,
    /// Dispatch attempts per command, including the first one.
    pub max_attempts: u32,
    /// How often a reply is re-applied after losing an optimistic
    /// concurrency race on the saga record.
    pub max_conflict_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            max_attempts: 3,
            max_conflict_retries: 5,
        }
    }
}

/// What the orchestrator did with a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    /// The named command was published.
    Dispatched(&'static str),
    Completed,
    Failed,
    Aborted,
    /// The reply does not answer the pending command (re-delivery or a
    /// reply for an instance that already ended).
    Duplicate,
    /// No instance exists for the reply's correlation id.
    Orphaned,
}

/// Outcome of one sweep over overdue instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Commands re-published.
    pub retried: usize,
    /// Instances marked failed after exhausting their attempts.
    pub failed: usize,
}

struct Inner<D: SagaDefinition> {
    channel: SharedChannel,
    repository: Arc<dyn SagaRepository>,
    subjects: SagaSubjects,
    config: OrchestratorConfig,
    step_timeout: TimeDelta,
    listener: Arc<dyn SagaListener>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    _definition: PhantomData<fn() -> D>,
}

/// Drives every instance of one saga type.
///
/// The orchestrator owns the reply subscription for its saga type and is
/// the only component that publishes commands. Every transition is
/// persisted before the resulting command is published, so a crash between
/// the two is repaired by [`Orchestrator::recover`] or the sweeper.
pub struct Orchestrator<D: SagaDefinition> {
    inner: Arc<Inner<D>>,
}

impl<D: SagaDefinition> Clone for Orchestrator<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: SagaDefinition> Orchestrator<D> {
    /// Creates an orchestrator that logs terminal instances.
    ///
    /// The reply subscription is in place when this returns.
    pub async fn new(
        channel: SharedChannel,
        repository: Arc<dyn SagaRepository>,
        subjects: SagaSubjects,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        Self::with_listener(
            channel,
            repository,
            subjects,
            config,
            Arc::new(LoggingListener),
        )
        .await
    }

    /// Creates an orchestrator that reports terminal instances to `listener`.
    pub async fn with_listener(
        channel: SharedChannel,
        repository: Arc<dyn SagaRepository>,
        subjects: SagaSubjects,
        config: OrchestratorConfig,
        listener: Arc<dyn SagaListener>,
    ) -> Result<Self> {
        if config.max_attempts == 0 {
            return Err(SagaError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let step_timeout = TimeDelta::from_std(config.step_timeout)
            .map_err(|e| SagaError::Config(format!("step_timeout: {e}")))?;

        let orchestrator = Self {
            inner: Arc::new(Inner {
                channel,
                repository,
                subjects,
                config,
                step_timeout,
                listener,
                subscriptions: Mutex::new(Vec::new()),
                _definition: PhantomData,
            }),
        };

        let handler = Arc::new(ReplyHandler {
            orchestrator: orchestrator.clone(),
        });
        let queue_group = format!("{}-orchestrator", D::SAGA_TYPE);
        let id = orchestrator
            .inner
            .channel
            .subscribe(&orchestrator.inner.subjects.reply, &queue_group, handler)
            .await?;
        orchestrator.inner.subscriptions.lock().await.push(id);

        tracing::info!(
            saga_type = D::SAGA_TYPE,
            reply_subject = %orchestrator.inner.subjects.reply,
            "orchestrator listening for replies"
        );
        Ok(orchestrator)
    }

    pub fn subjects(&self) -> &SagaSubjects {
        &self.inner.subjects
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Starts a saga for `payload` by publishing its first command.
    ///
    /// Fails with [`SagaError::AlreadyStarted`] while an instance for the
    /// same entity is still active. If the first command cannot be
    /// published the instance is marked failed, so the caller may retry.
    #[tracing::instrument(skip_all, fields(saga_type = D::SAGA_TYPE, correlation_id = tracing::field::Empty))]
    pub async fn start(&self, payload: D::Payload) -> Result<()> {
        D::validate(&payload)?;
        let correlation_id = D::correlation_id(&payload);
        tracing::Span::current().record("correlation_id", tracing::field::display(correlation_id));

        let already_started = || SagaError::AlreadyStarted {
            saga_type: D::SAGA_TYPE,
            correlation_id,
        };

        let expected = match self
            .inner
            .repository
            .get(D::SAGA_TYPE, correlation_id)
            .await?
        {
            Some(existing) if !existing.status().is_terminal() => return Err(already_started()),
            Some(existing) => existing.version(),
            None => 0,
        };

        let now = Utc::now();
        let step = D::initial_command();
        let snapshot = serde_json::to_value(&payload)?;

        let mut instance = SagaInstance::new(D::SAGA_TYPE, correlation_id);
        instance.apply(SagaEvent::saga_started(
            D::SAGA_TYPE,
            correlation_id,
            snapshot.clone(),
            now,
        ));
        instance.apply(SagaEvent::command_dispatched(
            step.as_str(),
            1,
            snapshot,
            now,
            now + self.inner.step_timeout,
        ));

        let version = match self.inner.repository.save(&instance, expected).await {
            Ok(version) => version,
            Err(SagaError::ConcurrencyConflict { .. }) => return Err(already_started()),
            Err(e) => return Err(e),
        };
        instance.set_version(version);
        metrics::counter!("saga_started_total", "saga_type" => D::SAGA_TYPE).increment(1);

        let command = Command::new(payload, step).in_run(instance.run_id());
        if let Err(e) = self.publish_command(&command).await {
            tracing::error!(error = %e, "initial command could not be published");
            instance.apply(SagaEvent::saga_failed(format!(
                "initial publish failed: {e}"
            )));
            instance.touch(Utc::now());
            match self.inner.repository.save(&instance, version).await {
                Ok(_) => {
                    metrics::counter!("saga_failed_total", "saga_type" => D::SAGA_TYPE)
                        .increment(1);
                }
                Err(save_err) => {
                    tracing::error!(error = %save_err, "could not mark saga failed");
                }
            }
            return Err(e);
        }

        tracing::info!(step = step.as_str(), "saga started");
        Ok(())
    }

    /// Applies a participant's reply to its saga instance.
    #[tracing::instrument(
        skip_all,
        fields(
            saga_type = D::SAGA_TYPE,
            step = reply.step.as_str(),
            correlation_id = tracing::field::Empty
        )
    )]
    pub async fn on_reply(&self, reply: Reply<D>) -> Result<ReplyDisposition> {
        let correlation_id = D::correlation_id(&reply.payload);
        tracing::Span::current().record("correlation_id", tracing::field::display(correlation_id));
        metrics::counter!(
            "saga_replies_total",
            "saga_type" => D::SAGA_TYPE,
            "step" => reply.step.as_str()
        )
        .increment(1);

        let mut conflicts = 0;
        loop {
            match self.apply_reply(&reply, correlation_id).await {
                Err(SagaError::ConcurrencyConflict { .. })
                    if conflicts < self.inner.config.max_conflict_retries =>
                {
                    conflicts += 1;
                    tracing::debug!(conflicts, "saga record changed concurrently, retrying");
                }
                other => return other,
            }
        }
    }

    async fn apply_reply(
        &self,
        reply: &Reply<D>,
        correlation_id: EntityId,
    ) -> Result<ReplyDisposition> {
        let Some(mut instance) = self
            .inner
            .repository
            .get(D::SAGA_TYPE, correlation_id)
            .await?
        else {
            tracing::warn!("reply for unknown saga instance");
            return Ok(ReplyDisposition::Orphaned);
        };

        let pending = match instance.pending() {
            Some(pending) if instance.status().is_active() => pending.clone(),
            _ => return Ok(self.duplicate(&instance)),
        };
        // A reply from an earlier start of the same saga.
        if matches!(
            (reply.run_id, instance.run_id()),
            (Some(run), Some(current)) if run != current
        ) {
            return Ok(self.duplicate(&instance));
        }
        let pending_step: D::Command =
            serde_json::from_value(serde_json::Value::String(pending.step.clone()))?;
        if !reply.step.is_unknown() && !D::answers(reply.step, pending_step) {
            return Ok(self.duplicate(&instance));
        }

        let now = Utc::now();
        let expected = instance.version();
        let outcome = D::outcome(reply.step);
        let error = reply
            .error
            .clone()
            .unwrap_or_else(|| format!("participant replied {}", reply.step.as_str()));

        match outcome {
            ReplyOutcome::Succeeded => {
                instance.apply(SagaEvent::step_completed(&pending.step));
            }
            ReplyOutcome::Failed => {
                instance.apply(SagaEvent::step_failed(&pending.step, error));
            }
            ReplyOutcome::Compensated => {
                instance.apply(SagaEvent::compensation_step_completed(&pending.step));
            }
            ReplyOutcome::CompensationFailed => {
                instance.apply(SagaEvent::compensation_step_failed(&pending.step, error));
            }
            ReplyOutcome::Unknown => {}
        }

        let next = D::next(reply.step);
        let disposition = if next.is_unknown() {
            match outcome {
                ReplyOutcome::Succeeded => {
                    instance.apply(SagaEvent::saga_completed());
                    ReplyDisposition::Completed
                }
                ReplyOutcome::Unknown => {
                    instance.apply(SagaEvent::saga_aborted(format!(
                        "unrecognized reply to {}",
                        pending.step
                    )));
                    ReplyDisposition::Aborted
                }
                ReplyOutcome::Failed => {
                    instance.apply(SagaEvent::saga_failed("step failed, nothing to undo"));
                    ReplyDisposition::Failed
                }
                ReplyOutcome::Compensated => {
                    instance.apply(SagaEvent::saga_failed("compensated"));
                    ReplyDisposition::Failed
                }
                ReplyOutcome::CompensationFailed => {
                    instance.apply(SagaEvent::saga_failed(
                        "compensation failed, manual intervention required",
                    ));
                    ReplyDisposition::Failed
                }
            }
        } else {
            instance.apply(SagaEvent::command_dispatched(
                next.as_str(),
                1,
                serde_json::to_value(&reply.payload)?,
                now,
                now + self.inner.step_timeout,
            ));
            ReplyDisposition::Dispatched(next.as_str())
        };

        instance.touch(now);
        let version = self.inner.repository.save(&instance, expected).await?;
        instance.set_version(version);

        match disposition {
            ReplyDisposition::Dispatched(step) => {
                let command =
                    Command::new(reply.payload.clone(), next).in_run(instance.run_id());
                self.publish_command(&command).await?;
                tracing::info!(next = step, "saga advanced");
            }
            ReplyDisposition::Completed
            | ReplyDisposition::Failed
            | ReplyDisposition::Aborted => self.finish(&instance, now).await,
            ReplyDisposition::Duplicate | ReplyDisposition::Orphaned => {}
        }

        Ok(disposition)
    }

    fn duplicate(&self, instance: &SagaInstance) -> ReplyDisposition {
        tracing::debug!(
            status = %instance.status(),
            pending = instance.pending().map(|p| p.step.as_str()),
            "ignoring reply that does not answer the pending command"
        );
        metrics::counter!("saga_duplicate_replies_total", "saga_type" => D::SAGA_TYPE)
            .increment(1);
        ReplyDisposition::Duplicate
    }

    /// Records metrics for a terminal instance and notifies the listener.
    async fn finish(&self, instance: &SagaInstance, now: DateTime<Utc>) {
        let duration = (now - instance.created_at())
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        metrics::histogram!("saga_duration_seconds", "saga_type" => D::SAGA_TYPE)
            .record(duration);

        let listener = &self.inner.listener;
        match instance.status() {
            SagaStatus::Completed => {
                metrics::counter!("saga_completed_total", "saga_type" => D::SAGA_TYPE)
                    .increment(1);
                listener.on_completed(instance).await;
            }
            SagaStatus::Aborted => {
                metrics::counter!("saga_aborted_total", "saga_type" => D::SAGA_TYPE)
                    .increment(1);
                listener.on_aborted(instance).await;
            }
            _ => {
                metrics::counter!("saga_failed_total", "saga_type" => D::SAGA_TYPE)
                    .increment(1);
                listener.on_failed(instance).await;
            }
        }
    }

    async fn publish_command(&self, command: &Command<D>) -> Result<()> {
        let subject = self.inner.subjects.command_subject(command.step);
        self.inner.channel.publish_json(&subject, command).await?;
        metrics::counter!(
            "saga_commands_published_total",
            "saga_type" => D::SAGA_TYPE,
            "step" => command.step.as_str()
        )
        .increment(1);
        tracing::debug!(subject, "command published");
        Ok(())
    }

    /// Rebuilds the pending command of an instance from its record.
    fn pending_command(instance: &SagaInstance) -> Result<Option<Command<D>>> {
        let Some(pending) = instance.pending() else {
            return Ok(None);
        };
        let step: D::Command =
            serde_json::from_value(serde_json::Value::String(pending.step.clone()))?;
        let payload: D::Payload = instance.payload_as()?;
        Ok(Some(Command::new(payload, step).in_run(instance.run_id())))
    }

    /// Re-publishes the pending command of every active instance.
    ///
    /// Run once at process start; commands persisted before a crash but
    /// never published are sent this way. Returns the number re-published.
    #[tracing::instrument(skip_all, fields(saga_type = D::SAGA_TYPE))]
    pub async fn recover(&self) -> Result<usize> {
        let active = self.inner.repository.find_active(D::SAGA_TYPE).await?;

        let mut republished = 0;
        for instance in &active {
            let command = match Self::pending_command(instance) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        correlation_id = %instance.correlation_id(),
                        error = %e,
                        "cannot rebuild pending command"
                    );
                    continue;
                }
            };
            self.publish_command(&command).await?;
            republished += 1;
        }

        if republished > 0 {
            tracing::info!(republished, "re-published pending commands");
        }
        Ok(republished)
    }

    /// Handles instances whose pending command passed its deadline.
    ///
    /// The command is re-published while attempts remain; after that the
    /// instance is marked failed and the listener notified.
    #[tracing::instrument(skip_all, fields(saga_type = D::SAGA_TYPE))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let overdue = self
            .inner
            .repository
            .find_overdue(D::SAGA_TYPE, now)
            .await?;

        let mut report = SweepReport::default();
        for mut instance in overdue {
            let Some(pending) = instance.pending().cloned() else {
                continue;
            };
            let correlation_id = instance.correlation_id();
            let expected = instance.version();

            if pending.attempt < self.inner.config.max_attempts {
                let command = match Self::pending_command(&instance) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(%correlation_id, error = %e, "cannot rebuild pending command");
                        continue;
                    }
                };
                let snapshot = instance.payload().clone();
                instance.apply(SagaEvent::command_dispatched(
                    pending.step.clone(),
                    pending.attempt + 1,
                    snapshot,
                    now,
                    now + self.inner.step_timeout,
                ));
                if !self.save_swept(&instance, expected).await? {
                    continue;
                }

                if let Err(e) = self.publish_command(&command).await {
                    tracing::warn!(%correlation_id, error = %e, "retry publish failed");
                    continue;
                }
                metrics::counter!(
                    "saga_retries_total",
                    "saga_type" => D::SAGA_TYPE,
                    "step" => command.step.as_str()
                )
                .increment(1);
                tracing::info!(
                    %correlation_id,
                    step = %pending.step,
                    attempt = pending.attempt + 1,
                    "command timed out, retrying"
                );
                report.retried += 1;
            } else {
                instance.apply(SagaEvent::saga_failed(format!(
                    "{} timed out after {} attempts",
                    pending.step, pending.attempt
                )));
                instance.touch(now);
                if !self.save_swept(&instance, expected).await? {
                    continue;
                }
                self.finish(&instance, now).await;
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Saves a swept instance. Returns false if a reply got there first.
    async fn save_swept(&self, instance: &SagaInstance, expected: u64) -> Result<bool> {
        match self.inner.repository.save(instance, expected).await {
            Ok(_) => Ok(true),
            Err(SagaError::ConcurrencyConflict { .. }) => {
                tracing::debug!(
                    correlation_id = %instance.correlation_id(),
                    "instance progressed while sweeping"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Loads the instance for `correlation_id`, if any.
    pub async fn get(&self, correlation_id: EntityId) -> Result<Option<SagaInstance>> {
        self.inner
            .repository
            .get(D::SAGA_TYPE, correlation_id)
            .await
    }

    /// Unsubscribes from the reply subject.
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<SubscriptionId> = self.inner.subscriptions.lock().await.drain(..).collect();
        for id in ids {
            self.inner.channel.unsubscribe(id).await?;
        }
        tracing::info!(saga_type = D::SAGA_TYPE, "orchestrator stopped");
        Ok(())
    }
}

/// Feeds decoded replies from the channel into the orchestrator.
struct ReplyHandler<D: SagaDefinition> {
    orchestrator: Orchestrator<D>,
}

#[async_trait]
impl<D: SagaDefinition> MessageHandler for ReplyHandler<D> {
    async fn handle(&self, message: Message) {
        let reply: Reply<D> = match message.decode() {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    saga_type = D::SAGA_TYPE,
                    subject = %message.subject,
                    error = %e,
                    "dropping undecodable reply"
                );
                metrics::counter!(
                    "saga_replies_total",
                    "saga_type" => D::SAGA_TYPE,
                    "step" => "undecodable"
                )
                .increment(1);
                return;
            }
        };

        if let Err(e) = self.orchestrator.on_reply(reply).await {
            tracing::error!(saga_type = D::SAGA_TYPE, error = %e, "failed to process reply");
        }
    }
}
