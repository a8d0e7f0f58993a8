//! Domain layer for the saga workspace.
//!
//! Holds the entity snapshots that travel inside saga commands and replies:
//! - [`User`], created across the credentials, profile and graph services
//! - [`EngagementEvent`], propagated into the event log and report stores

pub mod engagement;
pub mod error;
pub mod user;

pub use common::EntityId;
pub use engagement::{EngagementEvent, EngagementKind};
pub use error::DomainError;
pub use user::{Gender, User, UserBuilder, UserType};
