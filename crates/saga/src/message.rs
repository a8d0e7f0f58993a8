//! Commands, replies and the subjects they travel on.

use common::EntityId;
use serde::{Deserialize, Serialize};

use crate::definition::{SagaDefinition, StepType};

/// An instruction to a participant to perform one step.
///
/// Wire shape: `{"payload": {...}, "step": "UpdateProfile", "run_id": "..."}`.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Command<D: SagaDefinition> {
    pub payload: D::Payload,
    pub step: D::Command,
    /// The saga run that issued the command; echoed back in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<EntityId>,
}

impl<D: SagaDefinition> Command<D> {
    pub fn new(payload: D::Payload, step: D::Command) -> Self {
        Self {
            payload,
            step,
            run_id: None,
        }
    }

    /// Tags the command with the run that issued it.
    pub fn in_run(mut self, run_id: Option<EntityId>) -> Self {
        self.run_id = run_id;
        self
    }
}

impl<D: SagaDefinition> Clone for Command<D> {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            step: self.step,
            run_id: self.run_id,
        }
    }
}

impl<D: SagaDefinition> std::fmt::Debug for Command<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("step", &self.step)
            .field("run_id", &self.run_id)
            .field("payload", &self.payload)
            .finish()
    }
}

/// A participant's answer to one command.
#[derive(Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Reply<D: SagaDefinition> {
    pub payload: D::Payload,
    pub step: D::Reply,
    /// Why the local write failed, for failure replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Copied from the command being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<EntityId>,
}

impl<D: SagaDefinition> Reply<D> {
    pub fn new(payload: D::Payload, step: D::Reply) -> Self {
        Self {
            payload,
            step,
            error: None,
            run_id: None,
        }
    }

    pub fn failed(payload: D::Payload, step: D::Reply, error: impl Into<String>) -> Self {
        Self {
            payload,
            step,
            error: Some(error.into()),
            run_id: None,
        }
    }

    /// Tags the reply with the run of the command it answers.
    pub fn in_run(mut self, run_id: Option<EntityId>) -> Self {
        self.run_id = run_id;
        self
    }
}

impl<D: SagaDefinition> Clone for Reply<D> {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            step: self.step,
            error: self.error.clone(),
            run_id: self.run_id,
        }
    }
}

impl<D: SagaDefinition> std::fmt::Debug for Reply<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("step", &self.step)
            .field("run_id", &self.run_id)
            .field("error", &self.error)
            .field("payload", &self.payload)
            .finish()
    }
}

/// Subject names for one saga type.
///
/// Commands go to `<command>.<StepName>` so each participant only receives
/// the steps it owns; replies all share one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaSubjects {
    pub command: String,
    pub reply: String,
}

impl SagaSubjects {
    pub fn new(command: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            reply: reply.into(),
        }
    }

    /// The default subjects of a saga type.
    pub fn defaults<D: SagaDefinition>() -> Self {
        Self::new(D::DEFAULT_COMMAND_SUBJECT, D::DEFAULT_REPLY_SUBJECT)
    }

    /// The subject a command of type `step` is published to.
    pub fn command_subject<S: StepType>(&self, step: S) -> String {
        format!("{}.{}", self.command, step.as_str())
    }
}
