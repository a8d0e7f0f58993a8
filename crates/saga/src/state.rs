//! Saga lifecycle states.

use serde::{Deserialize, Serialize};

/// The status of a saga instance.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──────────────────────────► Completed
///                          ├──► Compensating ──┬──────► Failed
///                          ├───────────────────┴──────► Failed
///                          └──► (Unknown reply) ──────► Aborted
/// ```
///
/// `Aborted` is kept apart from `Completed` so a saga that stopped on an
/// unrecognized reply is never mistaken for one that finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// No record has been written yet.
    #[default]
    NotStarted,

    /// Forward steps are being executed.
    Running,

    /// A step failed and compensating commands are in progress.
    Compensating,

    /// All steps completed successfully (terminal).
    Completed,

    /// A step failed, timed out, or compensation finished (terminal).
    Failed,

    /// A participant replied with an unrecognized step (terminal).
    Aborted,
}

impl SagaStatus {
    /// Returns true while the saga still expects replies.
    pub fn is_active(&self) -> bool {
        matches!(self, SagaStatus::Running | SagaStatus::Compensating)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Aborted
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::NotStarted => "NotStarted",
            SagaStatus::Running => "Running",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
            SagaStatus::Aborted => "Aborted",
        }
    }

    /// Parses a state name produced by [`SagaStatus::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NotStarted" => Some(SagaStatus::NotStarted),
            "Running" => Some(SagaStatus::Running),
            "Compensating" => Some(SagaStatus::Compensating),
            "Completed" => Some(SagaStatus::Completed),
            "Failed" => Some(SagaStatus::Failed),
            "Aborted" => Some(SagaStatus::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SagaStatus; 6] = [
        SagaStatus::NotStarted,
        SagaStatus::Running,
        SagaStatus::Compensating,
        SagaStatus::Completed,
        SagaStatus::Failed,
        SagaStatus::Aborted,
    ];

    #[test]
    fn test_default_state_is_not_started() {
        assert_eq!(SagaStatus::default(), SagaStatus::NotStarted);
    }

    #[test]
    fn test_active_states() {
        assert!(!SagaStatus::NotStarted.is_active());
        assert!(SagaStatus::Running.is_active());
        assert!(SagaStatus::Compensating.is_active());
        assert!(!SagaStatus::Completed.is_active());
        assert!(!SagaStatus::Failed.is_active());
        assert!(!SagaStatus::Aborted.is_active());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaStatus::NotStarted.is_terminal());
        assert!(!SagaStatus::Running.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(SagaStatus::Aborted.is_terminal());
    }

    #[test]
    fn test_parse_matches_display() {
        for status in ALL {
            assert_eq!(SagaStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(SagaStatus::parse("Done"), None);
    }
}
