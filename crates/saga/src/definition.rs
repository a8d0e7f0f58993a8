//! Saga definitions: step vocabularies and the reply-to-command table.

use std::fmt::Debug;
use std::hash::Hash;

use common::EntityId;
use domain::DomainError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A closed set of command or reply types for one saga.
///
/// Every vocabulary has a distinguished `UNKNOWN` member. It is what an
/// unrecognized step name decodes to, and what `next` returns when there is
/// nothing left to do.
pub trait StepType:
    Copy + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The catch-all member.
    const UNKNOWN: Self;

    /// The step name as it appears on the wire and in subjects.
    fn as_str(&self) -> &'static str;

    fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

/// How a reply affects the saga instance it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// A forward step was applied.
    Succeeded,
    /// A forward step could not be applied.
    Failed,
    /// A compensating step was applied.
    Compensated,
    /// A compensating step could not be applied.
    CompensationFailed,
    /// The participant did not recognize the command.
    Unknown,
}

/// The fixed shape of one saga type.
///
/// Implementations are stateless. `next` must be total: every reply type,
/// including `Reply::UNKNOWN`, maps to some command type, and
/// `Command::UNKNOWN` means the saga is over.
pub trait SagaDefinition: Send + Sync + 'static {
    /// The entity snapshot carried by every command and reply.
    type Payload: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;
    type Command: StepType;
    type Reply: StepType;

    /// Name of the saga type, used as the repository key and metric label.
    const SAGA_TYPE: &'static str;
    const DEFAULT_COMMAND_SUBJECT: &'static str;
    const DEFAULT_REPLY_SUBJECT: &'static str;

    /// Forward steps in execution order.
    fn steps() -> &'static [Self::Command];

    /// The command published by `start`.
    fn initial_command() -> Self::Command;

    /// The command to publish after `reply`.
    fn next(reply: Self::Reply) -> Self::Command;

    fn outcome(reply: Self::Reply) -> ReplyOutcome;

    /// The reply a participant sends after applying `command`.
    fn success_reply(command: Self::Command) -> Self::Reply;

    /// The reply a participant sends when applying `command` failed.
    fn failure_reply(command: Self::Command) -> Self::Reply;

    /// Returns true if `reply` is a possible answer to `command`.
    fn answers(reply: Self::Reply, command: Self::Command) -> bool {
        reply == Self::success_reply(command) || reply == Self::failure_reply(command)
    }

    /// The id that correlates every exchange of one saga instance.
    fn correlation_id(payload: &Self::Payload) -> EntityId;

    /// Checks a payload before the saga starts.
    fn validate(_payload: &Self::Payload) -> Result<(), DomainError> {
        Ok(())
    }
}
