//! Saga instance events.

use chrono::{DateTime, Utc};
use common::EntityId;
use serde::{Deserialize, Serialize};

/// Events that change a saga instance.
///
/// The orchestrator never mutates a [`SagaInstance`](crate::SagaInstance)
/// directly; it builds events and applies them, then persists the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// A command was handed to the channel (first attempt or retry).
    CommandDispatched(CommandDispatchedData),

    /// A forward step completed successfully.
    StepCompleted(StepData),

    /// A forward step failed.
    StepFailed(StepFailedData),

    /// A compensation step completed successfully.
    CompensationStepCompleted(StepData),

    /// A compensation step failed.
    CompensationStepFailed(StepFailedData),

    /// Saga completed successfully.
    SagaCompleted(SagaEndedData),

    /// Saga failed, after compensation or timeout.
    SagaFailed(SagaFailedData),

    /// Saga stopped on a reply nobody recognized.
    SagaAborted(SagaFailedData),
}

impl SagaEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::CommandDispatched(_) => "CommandDispatched",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
            SagaEvent::SagaAborted(_) => "SagaAborted",
        }
    }
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub saga_type: String,
    /// The id of the entity the saga is about.
    pub correlation_id: EntityId,
    /// The entity snapshot as given to `start`.
    pub payload: serde_json::Value,
    /// Fresh for every start; commands and replies of this run carry it.
    pub run_id: EntityId,
    pub started_at: DateTime<Utc>,
}

/// Data for CommandDispatched event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDispatchedData {
    /// The command type name.
    pub step: String,
    /// 1 for the first dispatch, incremented on every retry.
    pub attempt: u32,
    /// The snapshot sent with the command.
    pub payload: serde_json::Value,
    pub dispatched_at: DateTime<Utc>,
    /// When the sweeper considers the command lost.
    pub deadline: DateTime<Utc>,
}

/// Data for step events that carry only the step name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepData {
    pub step: String,
}

/// Data for StepFailed and CompensationStepFailed events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step: String,
    pub error: String,
}

/// Data for SagaCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaEndedData {
    pub ended_at: DateTime<Utc>,
}

/// Data for SagaFailed and SagaAborted events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub reason: String,
    pub ended_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    /// Creates a SagaStarted event.
    pub fn saga_started(
        saga_type: impl Into<String>,
        correlation_id: EntityId,
        payload: serde_json::Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_type: saga_type.into(),
            correlation_id,
            payload,
            run_id: EntityId::new(),
            started_at,
        })
    }

    /// Creates a CommandDispatched event.
    pub fn command_dispatched(
        step: impl Into<String>,
        attempt: u32,
        payload: serde_json::Value,
        dispatched_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        SagaEvent::CommandDispatched(CommandDispatchedData {
            step: step.into(),
            attempt,
            payload,
            dispatched_at,
            deadline,
        })
    }

    pub fn step_completed(step: impl Into<String>) -> Self {
        SagaEvent::StepCompleted(StepData { step: step.into() })
    }

    pub fn step_failed(step: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step: step.into(),
            error: error.into(),
        })
    }

    pub fn compensation_step_completed(step: impl Into<String>) -> Self {
        SagaEvent::CompensationStepCompleted(StepData { step: step.into() })
    }

    pub fn compensation_step_failed(step: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::CompensationStepFailed(StepFailedData {
            step: step.into(),
            error: error.into(),
        })
    }

    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaEndedData {
            ended_at: Utc::now(),
        })
    }

    pub fn saga_failed(reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            reason: reason.into(),
            ended_at: Utc::now(),
        })
    }

    pub fn saga_aborted(reason: impl Into<String>) -> Self {
        SagaEvent::SagaAborted(SagaFailedData {
            reason: reason.into(),
            ended_at: Utc::now(),
        })
    }
}
