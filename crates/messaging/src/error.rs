use thiserror::Error;

use crate::SubscriptionId;

/// Errors that can occur when interacting with a message channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A message could not be handed to the transport.
    #[error("Publish to '{subject}' failed: {reason}")]
    Publish { subject: String, reason: String },

    /// A subscription could not be established.
    #[error("Subscription to '{subject}' failed: {reason}")]
    Subscribe { subject: String, reason: String },

    /// No subscription exists with the given ID.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// The transport connection could not be established or was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
