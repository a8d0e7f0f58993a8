//! The user-creation saga.
//!
//! Writes a new user to three independently owned stores:
//! 1. Credentials (username and password)
//! 2. Profile (personal or business data)
//! 3. Social graph (a node for the user)
//!
//! A failure after the credentials write is undone in reverse order with
//! `RollbackProfile` and `RollbackCredentials`.

use common::EntityId;
use domain::{DomainError, User};
use serde::{Deserialize, Serialize};

use crate::definition::{ReplyOutcome, SagaDefinition, StepType};

/// Commands of the user-creation saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateUserCommand {
    UpdateCredentials,
    UpdateProfile,
    UpdateGraph,
    RollbackProfile,
    RollbackCredentials,
    #[serde(other)]
    Unknown,
}

impl StepType for CreateUserCommand {
    const UNKNOWN: Self = CreateUserCommand::Unknown;

    fn as_str(&self) -> &'static str {
        match self {
            CreateUserCommand::UpdateCredentials => "UpdateCredentials",
            CreateUserCommand::UpdateProfile => "UpdateProfile",
            CreateUserCommand::UpdateGraph => "UpdateGraph",
            CreateUserCommand::RollbackProfile => "RollbackProfile",
            CreateUserCommand::RollbackCredentials => "RollbackCredentials",
            CreateUserCommand::Unknown => "Unknown",
        }
    }
}

/// Replies of the user-creation saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateUserReply {
    CredentialsUpdated,
    CredentialsFailed,
    ProfileUpdated,
    ProfileFailed,
    GraphUpdated,
    GraphFailed,
    ProfileRolledBack,
    CredentialsRolledBack,
    ProfileRollbackFailed,
    CredentialsRollbackFailed,
    #[serde(other)]
    Unknown,
}

impl StepType for CreateUserReply {
    const UNKNOWN: Self = CreateUserReply::Unknown;

    fn as_str(&self) -> &'static str {
        match self {
            CreateUserReply::CredentialsUpdated => "CredentialsUpdated",
            CreateUserReply::CredentialsFailed => "CredentialsFailed",
            CreateUserReply::ProfileUpdated => "ProfileUpdated",
            CreateUserReply::ProfileFailed => "ProfileFailed",
            CreateUserReply::GraphUpdated => "GraphUpdated",
            CreateUserReply::GraphFailed => "GraphFailed",
            CreateUserReply::ProfileRolledBack => "ProfileRolledBack",
            CreateUserReply::CredentialsRolledBack => "CredentialsRolledBack",
            CreateUserReply::ProfileRollbackFailed => "ProfileRollbackFailed",
            CreateUserReply::CredentialsRollbackFailed => "CredentialsRollbackFailed",
            CreateUserReply::Unknown => "Unknown",
        }
    }
}

/// Definition of the user-creation saga, correlated by user id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateUserSaga;

impl SagaDefinition for CreateUserSaga {
    type Payload = User;
    type Command = CreateUserCommand;
    type Reply = CreateUserReply;

    const SAGA_TYPE: &'static str = "CreateUser";
    const DEFAULT_COMMAND_SUBJECT: &'static str = "create-user-command";
    const DEFAULT_REPLY_SUBJECT: &'static str = "create-user-reply";

    fn steps() -> &'static [CreateUserCommand] {
        &[
            CreateUserCommand::UpdateCredentials,
            CreateUserCommand::UpdateProfile,
            CreateUserCommand::UpdateGraph,
        ]
    }

    fn initial_command() -> CreateUserCommand {
        CreateUserCommand::UpdateCredentials
    }

    fn next(reply: CreateUserReply) -> CreateUserCommand {
        use CreateUserCommand as C;
        use CreateUserReply as R;

        match reply {
            R::CredentialsUpdated => C::UpdateProfile,
            R::ProfileUpdated => C::UpdateGraph,
            R::ProfileFailed => C::RollbackCredentials,
            R::GraphFailed => C::RollbackProfile,
            R::ProfileRolledBack => C::RollbackCredentials,
            R::GraphUpdated
            | R::CredentialsFailed
            | R::CredentialsRolledBack
            | R::ProfileRollbackFailed
            | R::CredentialsRollbackFailed
            | R::Unknown => C::Unknown,
        }
    }

    fn outcome(reply: CreateUserReply) -> ReplyOutcome {
        use CreateUserReply as R;

        match reply {
            R::CredentialsUpdated | R::ProfileUpdated | R::GraphUpdated => ReplyOutcome::Succeeded,
            R::CredentialsFailed | R::ProfileFailed | R::GraphFailed => ReplyOutcome::Failed,
            R::ProfileRolledBack | R::CredentialsRolledBack => ReplyOutcome::Compensated,
            R::ProfileRollbackFailed | R::CredentialsRollbackFailed => {
                ReplyOutcome::CompensationFailed
            }
            R::Unknown => ReplyOutcome::Unknown,
        }
    }

    fn success_reply(command: CreateUserCommand) -> CreateUserReply {
        use CreateUserCommand as C;
        use CreateUserReply as R;

        match command {
            C::UpdateCredentials => R::CredentialsUpdated,
            C::UpdateProfile => R::ProfileUpdated,
            C::UpdateGraph => R::GraphUpdated,
            C::RollbackProfile => R::ProfileRolledBack,
            C::RollbackCredentials => R::CredentialsRolledBack,
            C::Unknown => R::Unknown,
        }
    }

    fn failure_reply(command: CreateUserCommand) -> CreateUserReply {
        use CreateUserCommand as C;
        use CreateUserReply as R;

        match command {
            C::UpdateCredentials => R::CredentialsFailed,
            C::UpdateProfile => R::ProfileFailed,
            C::UpdateGraph => R::GraphFailed,
            C::RollbackProfile => R::ProfileRollbackFailed,
            C::RollbackCredentials => R::CredentialsRollbackFailed,
            C::Unknown => R::Unknown,
        }
    }

    fn correlation_id(payload: &User) -> EntityId {
        payload.id
    }

    fn validate(payload: &User) -> Result<(), DomainError> {
        payload.validate()
    }
}
