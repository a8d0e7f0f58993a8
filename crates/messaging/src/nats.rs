//! NATS JetStream transport.
//!
//! Every subject lives in one file-backed stream, and each subscription is a
//! durable pull consumer named after its queue group. Members of a group
//! bind to the same consumer and share its messages; the consumer keeps its
//! position across restarts, so anything published while a service is down
//! is delivered once it comes back. A message is acked only after its
//! handler has returned; unacked messages are redelivered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, PullConsumer, pull};
use async_nats::jetstream::stream::{self, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::{ChannelError, Message, MessageChannel, MessageHandler, Result, SubscriptionId};

/// Connection and stream settings for [`NatsChannel`].
#[derive(Debug, Clone)]
pub struct NatsChannelConfig {
    /// Server URL, e.g. `nats://localhost:4222`.
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Name of the JetStream stream holding every saga subject.
    pub stream: String,
    /// Subjects captured by the stream; wildcards allowed.
    pub subjects: Vec<String>,
    /// How long unconsumed messages are kept.
    pub max_age: Duration,
    /// How long a delivered message may stay unacked before redelivery.
    pub ack_wait: Duration,
}

impl Default for NatsChannelConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            user: None,
            password: None,
            stream: "SAGAS".to_string(),
            subjects: Vec::new(),
            max_age: Duration::from_secs(24 * 60 * 60),
            ack_wait: Duration::from_secs(30),
        }
    }
}

impl NatsChannelConfig {
    fn stream_config(&self) -> stream::Config {
        stream::Config {
            name: self.stream.clone(),
            subjects: self.subjects.clone(),
            // Limits, not WorkQueue: several queue groups may consume one subject.
            retention: RetentionPolicy::Limits,
            max_age: self.max_age,
            storage: StorageType::File,
            num_replicas: 1,
            ..Default::default()
        }
    }

    fn consumer_config(&self, name: &str, subject: &str) -> pull::Config {
        pull::Config {
            durable_name: Some(name.to_string()),
            filter_subject: subject.to_string(),
            deliver_policy: DeliverPolicy::New,
            ack_policy: AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            ..Default::default()
        }
    }
}

/// Durable consumer name for a queue group on a subject.
///
/// Consumer names may not contain `.`, `*`, `>` or whitespace.
fn consumer_name(queue_group: &str, subject: &str) -> String {
    format!("{queue_group}-{subject}")
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

struct Subscription {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Message channel backed by NATS JetStream.
#[derive(Clone)]
pub struct NatsChannel {
    jetstream: Context,
    config: NatsChannelConfig,
    stream: stream::Stream,
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription>>>,
}

impl NatsChannel {
    /// Connects to the configured server and ensures the stream exists.
    pub async fn connect(config: &NatsChannelConfig) -> Result<Self> {
        let mut options = async_nats::ConnectOptions::new();
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }

        let client = options
            .connect(config.url.as_str())
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(config.stream_config())
            .await
            .map_err(|e| ChannelError::Connection(format!("stream {}: {e}", config.stream)))?;

        tracing::info!(
            url = %config.url,
            stream = %config.stream,
            subjects = ?config.subjects,
            "connected to NATS JetStream"
        );

        Ok(Self {
            jetstream,
            config: config.clone(),
            stream,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn consumer(&self, name: &str, subject: &str) -> Result<PullConsumer> {
        self.stream
            .get_or_create_consumer(name, self.config.consumer_config(name, subject))
            .await
            .map_err(|e| ChannelError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MessageChannel for NatsChannel {
    /// Returns once the stream has stored the message.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let failed = |reason: String| ChannelError::Publish {
            subject: subject.to_string(),
            reason,
        };

        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| failed(e.to_string()))?;
        ack.await.map_err(|e| failed(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId> {
        let name = consumer_name(queue_group, subject);
        let consumer = self.consumer(&name, subject).await?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| ChannelError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let (stop, mut stopped) = watch::channel(false);
        let consumer = name.clone();
        let task = tokio::spawn(async move {
            loop {
                // The stop signal is only observed between messages, so a
                // handler always runs to completion before its ack.
                let next = tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    next = messages.next() => next,
                };

                match next {
                    Some(Ok(msg)) => {
                        let message = Message::new(msg.subject.to_string(), msg.payload.to_vec());
                        handler.handle(message).await;
                        if let Err(e) = msg.ack().await {
                            tracing::warn!(consumer = %consumer, error = %e, "failed to ack message");
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(consumer = %consumer, error = %e, "error receiving message");
                    }
                    None => break,
                }
            }
            tracing::debug!(consumer = %consumer, "consumer stopped");
        });

        let id = SubscriptionId::new();
        self.subscriptions
            .lock()
            .await
            .insert(id, Subscription { stop, task });
        tracing::debug!(subject, queue_group, consumer = %name, subscription = %id, "subscribed");
        Ok(id)
    }

    /// Lets the in-flight message finish and be acked, then stops pulling.
    /// The durable consumer stays on the server for the next start.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let subscription = self
            .subscriptions
            .lock()
            .await
            .remove(&id)
            .ok_or(ChannelError::SubscriptionNotFound(id))?;

        let _ = subscription.stop.send(true);
        if let Err(e) = subscription.task.await {
            tracing::error!(subscription = %id, error = %e, "consumer task panicked");
        }
        Ok(())
    }
}
