//! Saga orchestration over a message channel.
//!
//! A saga keeps several independently owned stores consistent without a
//! distributed transaction. An [`Orchestrator`] publishes one command at a
//! time; each [`Participant`] applies the command to its own store and
//! publishes a reply; the orchestrator looks the reply up in the saga's
//! [`SagaDefinition`] to decide what to publish next.
//!
//! Two sagas are defined:
//! - [`CreateUserSaga`]: credentials, then profile, then social graph
//! - [`CreateEventSaga`]: event log, then daily report
//!
//! If a step fails, the steps already applied are compensated in reverse
//! order. Every instance is persisted through a [`SagaRepository`] before
//! its next command is published, and a [`SagaSweeper`] re-publishes
//! commands that went unanswered.

pub mod definition;
pub mod error;
pub mod event_propagation;
pub mod events;
pub mod instance;
pub mod listener;
pub mod message;
pub mod orchestrator;
pub mod participant;
pub mod repository;
pub mod services;
pub mod state;
pub mod sweeper;
pub mod user_creation;

pub use definition::{ReplyOutcome, SagaDefinition, StepType};
pub use error::{Result, SagaError};
pub use event_propagation::{CreateEventCommand, CreateEventReply, CreateEventSaga};
pub use events::SagaEvent;
pub use instance::{PendingCommand, SagaInstance};
pub use listener::{LoggingListener, SagaListener};
pub use message::{Command, Reply, SagaSubjects};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ReplyDisposition, SweepReport};
pub use participant::{Participant, ParticipantBuilder, StepHandler};
pub use repository::{InMemorySagaRepository, PostgresSagaRepository, SagaRepository};
pub use state::SagaStatus;
pub use sweeper::{SagaSweeper, Sweepable};
pub use user_creation::{CreateUserCommand, CreateUserReply, CreateUserSaga};
