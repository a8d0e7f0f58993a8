//! The event-propagation saga.
//!
//! Records an engagement event in the event log, then folds it into the
//! daily report. If the report cannot be updated the log entry is removed.

use common::EntityId;
use domain::{DomainError, EngagementEvent};
use serde::{Deserialize, Serialize};

use crate::definition::{ReplyOutcome, SagaDefinition, StepType};

/// Commands of the event-propagation saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateEventCommand {
    UpdateEventLog,
    UpdateReport,
    RollbackEventLog,
    #[serde(other)]
    Unknown,
}

impl StepType for CreateEventCommand {
    const UNKNOWN: Self = CreateEventCommand::Unknown;

    fn as_str(&self) -> &'static str {
        match self {
            CreateEventCommand::UpdateEventLog => "UpdateEventLog",
            CreateEventCommand::UpdateReport => "UpdateReport",
            CreateEventCommand::RollbackEventLog => "RollbackEventLog",
            CreateEventCommand::Unknown => "Unknown",
        }
    }
}

/// Replies of the event-propagation saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateEventReply {
    EventLogUpdated,
    EventLogFailed,
    ReportUpdated,
    ReportFailed,
    EventLogRolledBack,
    RollbackFailed,
    #[serde(other)]
    Unknown,
}

impl StepType for CreateEventReply {
    const UNKNOWN: Self = CreateEventReply::Unknown;

    fn as_str(&self) -> &'static str {
        match self {
            CreateEventReply::EventLogUpdated => "EventLogUpdated",
            CreateEventReply::EventLogFailed => "EventLogFailed",
            CreateEventReply::ReportUpdated => "ReportUpdated",
            CreateEventReply::ReportFailed => "ReportFailed",
            CreateEventReply::EventLogRolledBack => "EventLogRolledBack",
            CreateEventReply::RollbackFailed => "RollbackFailed",
            CreateEventReply::Unknown => "Unknown",
        }
    }
}

/// Definition of the event-propagation saga, correlated by event id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateEventSaga;

impl SagaDefinition for CreateEventSaga {
    type Payload = EngagementEvent;
    type Command = CreateEventCommand;
    type Reply = CreateEventReply;

    const SAGA_TYPE: &'static str = "CreateEvent";
    const DEFAULT_COMMAND_SUBJECT: &'static str = "create-event-command";
    const DEFAULT_REPLY_SUBJECT: &'static str = "create-event-reply";

    fn steps() -> &'static [CreateEventCommand] {
        &[
            CreateEventCommand::UpdateEventLog,
            CreateEventCommand::UpdateReport,
        ]
    }

    fn initial_command() -> CreateEventCommand {
        CreateEventCommand::UpdateEventLog
    }

    fn next(reply: CreateEventReply) -> CreateEventCommand {
        use CreateEventCommand as C;
        use CreateEventReply as R;

        match reply {
            R::EventLogUpdated => C::UpdateReport,
            R::ReportFailed => C::RollbackEventLog,
            R::ReportUpdated
            | R::EventLogFailed
            | R::EventLogRolledBack
            | R::RollbackFailed
            | R::Unknown => C::Unknown,
        }
    }

    fn outcome(reply: CreateEventReply) -> ReplyOutcome {
        use CreateEventReply as R;

        match reply {
            R::EventLogUpdated | R::ReportUpdated => ReplyOutcome::Succeeded,
            R::EventLogFailed | R::ReportFailed => ReplyOutcome::Failed,
            R::EventLogRolledBack => ReplyOutcome::Compensated,
            R::RollbackFailed => ReplyOutcome::CompensationFailed,
            R::Unknown => ReplyOutcome::Unknown,
        }
    }

    fn success_reply(command: CreateEventCommand) -> CreateEventReply {
        use CreateEventCommand as C;
        use CreateEventReply as R;

        match command {
            C::UpdateEventLog => R::EventLogUpdated,
            C::UpdateReport => R::ReportUpdated,
            C::RollbackEventLog => R::EventLogRolledBack,
            C::Unknown => R::Unknown,
        }
    }

    fn failure_reply(command: CreateEventCommand) -> CreateEventReply {
        use CreateEventCommand as C;
        use CreateEventReply as R;

        match command {
            C::UpdateEventLog => R::EventLogFailed,
            C::UpdateReport => R::ReportFailed,
            C::RollbackEventLog => R::RollbackFailed,
            C::Unknown => R::Unknown,
        }
    }

    fn correlation_id(payload: &EngagementEvent) -> EntityId {
        payload.event_id
    }

    fn validate(payload: &EngagementEvent) -> Result<(), DomainError> {
        payload.validate()
    }
}
