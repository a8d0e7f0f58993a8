//! Participant-owned stores and the step handlers that write to them.

pub mod credentials;
pub mod engagement;
pub mod graph;
pub mod profile;

pub use credentials::{
    CREDENTIALS_SERVICE, Credentials, CredentialsStore, InMemoryCredentialsStore,
    RemoveCredentials, UpsertCredentials, credentials_participant,
};
pub use engagement::{
    AppendEventLog, DailyReport, EVENT_LOG_SERVICE, EventLogStore, InMemoryEventLogStore,
    InMemoryReportStore, REPORT_SERVICE, RemoveEventLogEntry, ReportStore, UpdateDailyReport,
    event_log_participant, report_participant,
};
pub use graph::{GRAPH_SERVICE, GraphStore, InMemoryGraphStore, UpsertUserNode, UserNode, graph_participant};
pub use profile::{
    InMemoryProfileStore, PROFILE_SERVICE, Profile, ProfileStore, RemoveProfile, UpsertProfile,
    profile_participant,
};
