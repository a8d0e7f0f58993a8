//! Shared types used across the saga workspace.

mod types;

pub use types::{EntityId, ParseEntityIdError};
