//! Channel contract shared by all transports.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::Result;

/// A raw message as it travels over the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The subject the message was published to.
    pub subject: String,
    /// The encoded message body.
    pub payload: Vec<u8>,
}

impl Message {
    /// Creates a new message.
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            subject: subject.into(),
            payload,
        }
    }

    /// Decodes the JSON body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Identifies a single subscription on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Creates a new random subscription ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives messages delivered to a subscription, one at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one delivered message.
    async fn handle(&self, message: Message);
}

/// A publish/subscribe transport addressed by subject.
///
/// Delivery is at-least-once. Within one subscription messages arrive in
/// publish order; nothing is promised across subjects.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publishes a message to a subject.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribes a handler to a subject as a member of `queue_group`.
    ///
    /// Each queue group receives every message once; members of the same
    /// group compete for messages.
    async fn subscribe(
        &self,
        subject: &str,
        queue_group: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId>;

    /// Stops delivering new messages to a subscription.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

/// Extension trait providing typed publishing on any channel.
#[async_trait]
pub trait MessageChannelExt: MessageChannel {
    /// Encodes a value as JSON and publishes it.
    async fn publish_json<T>(&self, subject: &str, message: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let payload = serde_json::to_vec(message)?;
        self.publish(subject, payload).await
    }
}

impl<T: MessageChannel + ?Sized> MessageChannelExt for T {}
