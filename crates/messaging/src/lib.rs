//! Message channel abstraction for saga orchestration.
//!
//! Orchestrators and participants never talk to each other directly; they
//! exchange serialized commands and replies over a [`MessageChannel`]
//! addressed by subject name. A channel supports competing-consumer queue
//! groups: every queue group subscribed to a subject receives each message
//! once, and members inside a group share the load.
//!
//! Two transports are provided:
//! - [`InMemoryChannel`] for tests and single-process deployments
//! - `NatsChannel` (feature `nats`) backed by a NATS server

pub mod channel;
pub mod error;
pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;

use std::sync::Arc;

pub use channel::{Message, MessageChannel, MessageChannelExt, MessageHandler, SubscriptionId};
pub use error::{ChannelError, Result};
pub use memory::InMemoryChannel;
#[cfg(feature = "nats")]
pub use nats::{NatsChannel, NatsChannelConfig};

/// A channel shared between orchestrators and participants.
pub type SharedChannel = Arc<dyn MessageChannel>;
