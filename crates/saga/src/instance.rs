//! The durable record of one saga execution.

use chrono::{DateTime, Utc};
use common::EntityId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::events::SagaEvent;
use crate::state::SagaStatus;

/// The command a saga instance is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub step: String,
    pub attempt: u32,
    pub dispatched_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A saga instance, keyed by `(saga_type, correlation_id)`.
///
/// Holds the last known entity snapshot and the command currently in
/// flight, which is everything needed to resume the saga after a restart.
/// `version` is the optimistic-concurrency token checked by the
/// repository on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    saga_type: String,
    correlation_id: EntityId,
    status: SagaStatus,
    payload: serde_json::Value,
    /// Identifies the current start; `None` until the first one.
    #[serde(default)]
    run_id: Option<EntityId>,
    pending: Option<PendingCommand>,
    completed_steps: Vec<String>,
    compensated_steps: Vec<String>,
    failure_reason: Option<String>,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// Creates an unsaved, not yet started instance.
    pub fn new(saga_type: impl Into<String>, correlation_id: EntityId) -> Self {
        let now = Utc::now();
        Self {
            saga_type: saga_type.into(),
            correlation_id,
            status: SagaStatus::NotStarted,
            payload: serde_json::Value::Null,
            run_id: None,
            pending: None,
            completed_steps: Vec::new(),
            compensated_steps: Vec::new(),
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an event to the instance.
    pub fn apply(&mut self, event: SagaEvent) {
        match event {
            SagaEvent::SagaStarted(data) => {
                self.saga_type = data.saga_type;
                self.correlation_id = data.correlation_id;
                self.payload = data.payload;
                self.run_id = Some(data.run_id);
                self.status = SagaStatus::Running;
                self.pending = None;
                self.completed_steps.clear();
                self.compensated_steps.clear();
                self.failure_reason = None;
                self.created_at = data.started_at;
                self.updated_at = data.started_at;
            }
            SagaEvent::CommandDispatched(data) => {
                self.payload = data.payload;
                self.updated_at = data.dispatched_at;
                self.pending = Some(PendingCommand {
                    step: data.step,
                    attempt: data.attempt,
                    dispatched_at: data.dispatched_at,
                    deadline: data.deadline,
                });
            }
            SagaEvent::StepCompleted(data) => {
                self.pending = None;
                self.completed_steps.push(data.step);
            }
            SagaEvent::StepFailed(data) => {
                self.pending = None;
                self.status = SagaStatus::Compensating;
                self.failure_reason = Some(format!("{}: {}", data.step, data.error));
            }
            SagaEvent::CompensationStepCompleted(data) => {
                self.pending = None;
                self.compensated_steps.push(data.step);
            }
            SagaEvent::CompensationStepFailed(data) => {
                self.pending = None;
                self.failure_reason = Some(format!("{}: {}", data.step, data.error));
            }
            SagaEvent::SagaCompleted(data) => {
                self.pending = None;
                self.status = SagaStatus::Completed;
                self.updated_at = data.ended_at;
            }
            SagaEvent::SagaFailed(data) => {
                self.pending = None;
                self.status = SagaStatus::Failed;
                self.failure_reason.get_or_insert(data.reason);
                self.updated_at = data.ended_at;
            }
            SagaEvent::SagaAborted(data) => {
                self.pending = None;
                self.status = SagaStatus::Aborted;
                self.failure_reason = Some(data.reason);
                self.updated_at = data.ended_at;
            }
        }
    }

    pub(crate) fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

// Query methods
impl SagaInstance {
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn correlation_id(&self) -> EntityId {
        self.correlation_id
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Returns the last known entity snapshot.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Decodes the last known entity snapshot.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Returns the id of the current run, set by every start.
    pub fn run_id(&self) -> Option<EntityId> {
        self.run_id
    }

    /// Returns the command awaiting a reply, if any.
    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// Returns the forward steps confirmed so far, in order.
    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    /// Returns the compensating steps confirmed so far, in order.
    pub fn compensated_steps(&self) -> &[String] {
        &self.compensated_steps
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns true if the pending command's deadline has passed.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.pending.as_ref().is_some_and(|p| p.deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn started() -> SagaInstance {
        let id = EntityId::from_u128(42);
        let mut saga = SagaInstance::new("CreateUser", id);
        saga.apply(SagaEvent::saga_started(
            "CreateUser",
            id,
            serde_json::json!({"id": id}),
            Utc::now(),
        ));
        saga
    }

    fn dispatch(saga: &mut SagaInstance, step: &str) {
        let now = Utc::now();
        saga.apply(SagaEvent::command_dispatched(
            step,
            1,
            saga.payload().clone(),
            now,
            now + Duration::seconds(30),
        ));
    }

    #[test]
    fn test_new_instance_is_not_started() {
        let saga = SagaInstance::new("CreateUser", EntityId::new());
        assert_eq!(saga.status(), SagaStatus::NotStarted);
        assert_eq!(saga.version(), 0);
        assert!(saga.pending().is_none());
        assert!(saga.run_id().is_none());
    }

    #[test]
    fn test_apply_saga_started() {
        let saga = started();
        assert_eq!(saga.status(), SagaStatus::Running);
        assert_eq!(saga.saga_type(), "CreateUser");
        assert_eq!(saga.correlation_id(), EntityId::from_u128(42));
    }

    #[test]
    fn test_forward_steps_complete() {
        let mut saga = started();
        dispatch(&mut saga, "UpdateCredentials");
        assert_eq!(saga.pending().unwrap().step, "UpdateCredentials");

        saga.apply(SagaEvent::step_completed("UpdateCredentials"));
        dispatch(&mut saga, "UpdateProfile");
        saga.apply(SagaEvent::step_completed("UpdateProfile"));
        saga.apply(SagaEvent::saga_completed());

        assert_eq!(saga.status(), SagaStatus::Completed);
        assert_eq!(saga.completed_steps(), &["UpdateCredentials", "UpdateProfile"]);
        assert!(saga.pending().is_none());
    }

    #[test]
    fn test_step_failure_enters_compensation() {
        let mut saga = started();
        dispatch(&mut saga, "UpdateCredentials");
        saga.apply(SagaEvent::step_completed("UpdateCredentials"));
        dispatch(&mut saga, "UpdateProfile");
        saga.apply(SagaEvent::step_failed("UpdateProfile", "disk full"));

        assert_eq!(saga.status(), SagaStatus::Compensating);
        assert_eq!(saga.failure_reason(), Some("UpdateProfile: disk full"));

        dispatch(&mut saga, "RollbackCredentials");
        saga.apply(SagaEvent::compensation_step_completed("RollbackCredentials"));
        saga.apply(SagaEvent::saga_failed("compensated"));

        assert_eq!(saga.status(), SagaStatus::Failed);
        assert_eq!(saga.compensated_steps(), &["RollbackCredentials"]);
        // The first failure stays the reported cause.
        assert_eq!(saga.failure_reason(), Some("UpdateProfile: disk full"));
    }

    #[test]
    fn test_abort_is_distinct_from_completion() {
        let mut saga = started();
        dispatch(&mut saga, "UpdateCredentials");
        saga.apply(SagaEvent::saga_aborted("unknown reply"));
        assert_eq!(saga.status(), SagaStatus::Aborted);
        assert_ne!(saga.status(), SagaStatus::Completed);
    }

    #[test]
    fn test_overdue_only_while_active() {
        let mut saga = started();
        dispatch(&mut saga, "UpdateCredentials");
        let later = Utc::now() + Duration::minutes(1);
        assert!(saga.is_overdue(later));
        assert!(!saga.is_overdue(Utc::now() - Duration::minutes(1)));

        saga.apply(SagaEvent::saga_failed("gave up"));
        assert!(!saga.is_overdue(later));
    }

    #[test]
    fn test_restart_clears_previous_run() {
        let mut saga = started();
        dispatch(&mut saga, "UpdateCredentials");
        saga.apply(SagaEvent::step_failed("UpdateCredentials", "taken"));
        saga.apply(SagaEvent::saga_failed("failed"));

        let id = saga.correlation_id();
        let previous_run = saga.run_id();
        saga.apply(SagaEvent::saga_started("CreateUser", id, serde_json::json!({}), Utc::now()));
        assert_eq!(saga.status(), SagaStatus::Running);
        assert!(saga.run_id().is_some());
        assert_ne!(saga.run_id(), previous_run);
        assert!(saga.failure_reason().is_none());
        assert!(saga.completed_steps().is_empty());
    }
}
