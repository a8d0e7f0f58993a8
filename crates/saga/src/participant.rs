//! Participant handlers: apply one saga step locally and reply.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use messaging::{Message, MessageChannelExt, MessageHandler, SharedChannel, SubscriptionId};
use tokio::sync::Mutex;

use crate::definition::{SagaDefinition, StepType};
use crate::error::Result;
use crate::message::{Command, Reply, SagaSubjects};

/// Performs one step against a participant's own store.
///
/// Implementations must be idempotent: the same command may be delivered
/// more than once. The returned snapshot is sent back with the reply and
/// may carry data the participant added.
#[async_trait]
pub trait StepHandler<P>: Send + Sync {
    async fn apply(&self, payload: P) -> Result<P>;
}

/// Builder for [`Participant`].
pub struct ParticipantBuilder<D: SagaDefinition> {
    name: String,
    channel: SharedChannel,
    subjects: SagaSubjects,
    handlers: HashMap<D::Command, Arc<dyn StepHandler<D::Payload>>>,
}

impl<D: SagaDefinition> ParticipantBuilder<D> {
    /// Handles commands of type `step` with `handler`.
    pub fn bind<H>(mut self, step: D::Command, handler: H) -> Self
    where
        H: StepHandler<D::Payload> + 'static,
    {
        self.handlers.insert(step, Arc::new(handler));
        self
    }

    /// Subscribes to `<command>.<Step>` for every bound step.
    pub async fn subscribe(self) -> Result<Participant<D>> {
        let participant = Participant {
            inner: Arc::new(ParticipantInner {
                name: self.name,
                channel: self.channel,
                subjects: self.subjects,
                handlers: self.handlers,
                subscriptions: Mutex::new(Vec::new()),
            }),
        };

        let mut steps: Vec<D::Command> = participant.inner.handlers.keys().copied().collect();
        steps.sort_by_key(|s| s.as_str());
        for step in steps {
            let subject = participant.inner.subjects.command_subject(step);
            let handler = Arc::new(CommandHandler {
                participant: participant.clone(),
            });
            let id = participant
                .inner
                .channel
                .subscribe(&subject, &participant.inner.name, handler)
                .await?;
            participant.inner.subscriptions.lock().await.push(id);
            tracing::info!(
                participant = %participant.inner.name,
                saga_type = D::SAGA_TYPE,
                subject,
                "participant subscribed"
            );
        }

        Ok(participant)
    }
}

struct ParticipantInner<D: SagaDefinition> {
    /// Also the queue group, so replicas of one service share commands.
    name: String,
    channel: SharedChannel,
    subjects: SagaSubjects,
    handlers: HashMap<D::Command, Arc<dyn StepHandler<D::Payload>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

/// One service's side of a saga.
///
/// Never publishes commands; answers every command it consumes with
/// exactly one reply on the saga's reply subject.
pub struct Participant<D: SagaDefinition> {
    inner: Arc<ParticipantInner<D>>,
}

impl<D: SagaDefinition> Clone for Participant<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: SagaDefinition> Participant<D> {
    /// Starts building a participant that consumes in queue group `name`.
    pub fn builder(
        name: impl Into<String>,
        channel: SharedChannel,
        subjects: SagaSubjects,
    ) -> ParticipantBuilder<D> {
        ParticipantBuilder {
            name: name.into(),
            channel,
            subjects,
            handlers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Runs the bound handler for a command and builds the reply.
    #[tracing::instrument(
        skip_all,
        fields(participant = %self.inner.name, step = command.step.as_str())
    )]
    pub async fn process(&self, command: Command<D>) -> Reply<D> {
        let run_id = command.run_id;
        self.answer(command).await.in_run(run_id)
    }

    async fn answer(&self, command: Command<D>) -> Reply<D> {
        let step = command.step;
        let Some(handler) = self.inner.handlers.get(&step) else {
            tracing::warn!("no handler bound for step");
            self.count(step, "unknown");
            return Reply::failed(
                command.payload,
                D::Reply::UNKNOWN,
                format!("{} does not handle {}", self.inner.name, step.as_str()),
            );
        };

        match handler.apply(command.payload.clone()).await {
            Ok(payload) => {
                self.count(step, "succeeded");
                Reply::new(payload, D::success_reply(step))
            }
            Err(e) => {
                tracing::warn!(error = %e, "local write failed");
                self.count(step, "failed");
                metrics::counter!(
                    "participant_failures_total",
                    "participant" => self.inner.name.clone(),
                    "step" => step.as_str()
                )
                .increment(1);
                Reply::failed(command.payload, D::failure_reply(step), e.to_string())
            }
        }
    }

    fn count(&self, step: D::Command, outcome: &'static str) {
        metrics::counter!(
            "participant_commands_total",
            "participant" => self.inner.name.clone(),
            "step" => step.as_str(),
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Stops consuming commands.
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<SubscriptionId> = self.inner.subscriptions.lock().await.drain(..).collect();
        for id in ids {
            self.inner.channel.unsubscribe(id).await?;
        }
        Ok(())
    }
}

struct CommandHandler<D: SagaDefinition> {
    participant: Participant<D>,
}

#[async_trait]
impl<D: SagaDefinition> MessageHandler for CommandHandler<D> {
    async fn handle(&self, message: Message) {
        let inner = &self.participant.inner;
        let command: Command<D> = match message.decode() {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(
                    participant = %inner.name,
                    subject = %message.subject,
                    error = %e,
                    "dropping undecodable command"
                );
                metrics::counter!(
                    "participant_commands_total",
                    "participant" => inner.name.clone(),
                    "step" => "undecodable",
                    "outcome" => "dropped"
                )
                .increment(1);
                return;
            }
        };

        let reply = self.participant.process(command).await;
        if let Err(e) = inner.channel.publish_json(&inner.subjects.reply, &reply).await {
            tracing::error!(participant = %inner.name, error = %e, "failed to publish reply");
        }
    }
}
