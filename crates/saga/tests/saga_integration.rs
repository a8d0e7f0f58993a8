//! Integration tests for saga orchestration over the in-memory channel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::EntityId;
use domain::{EngagementEvent, EngagementKind, Gender, User};
use messaging::{InMemoryChannel, MessageChannelExt, SharedChannel};
use saga::services::{
    InMemoryCredentialsStore, InMemoryEventLogStore, InMemoryGraphStore, InMemoryProfileStore,
    InMemoryReportStore, credentials_participant, event_log_participant, graph_participant,
    profile_participant, report_participant,
};
use saga::{
    Command, CreateEventSaga, CreateUserCommand, CreateUserReply, CreateUserSaga,
    InMemorySagaRepository, Orchestrator, OrchestratorConfig, Participant, Reply,
    ReplyDisposition, SagaError, SagaInstance, SagaListener, SagaRepository, SagaStatus,
    SagaSubjects, SagaSweeper,
};
use tokio::sync::{Mutex, watch};

const USER_ID: EntityId = EntityId::from_u128(42);

fn alice() -> User {
    User::regular("alice")
        .id(USER_ID)
        .name("Alice", "Smith")
        .gender(Gender::Female)
        .age(30)
        .residence("Lisbon")
        .email("alice@example.com")
        .password("s3cret-hash")
        .build()
        .unwrap()
}

#[derive(Default)]
struct RecordingListener {
    terminal: Mutex<Vec<(EntityId, SagaStatus)>>,
}

impl RecordingListener {
    async fn statuses(&self) -> Vec<SagaStatus> {
        self.terminal.lock().await.iter().map(|(_, s)| *s).collect()
    }
}

#[async_trait]
impl SagaListener for RecordingListener {
    async fn on_completed(&self, instance: &SagaInstance) {
        self.terminal
            .lock()
            .await
            .push((instance.correlation_id(), instance.status()));
    }

    async fn on_failed(&self, instance: &SagaInstance) {
        self.on_completed(instance).await;
    }

    async fn on_aborted(&self, instance: &SagaInstance) {
        self.on_completed(instance).await;
    }
}

struct UserHarness {
    channel: InMemoryChannel,
    orchestrator: Orchestrator<CreateUserSaga>,
    listener: Arc<RecordingListener>,
    credentials: InMemoryCredentialsStore,
    profiles: InMemoryProfileStore,
    graph: InMemoryGraphStore,
    participants: Vec<Participant<CreateUserSaga>>,
}

#[derive(Clone, Copy)]
struct Services {
    credentials: bool,
    profile: bool,
    graph: bool,
}

impl Services {
    const ALL: Services = Services {
        credentials: true,
        profile: true,
        graph: true,
    };
    const NONE: Services = Services {
        credentials: false,
        profile: false,
        graph: false,
    };
}

impl UserHarness {
    async fn new() -> Self {
        Self::build(Arc::new(InMemorySagaRepository::new()), Services::ALL).await
    }

    async fn build(repository: Arc<dyn SagaRepository>, services: Services) -> Self {
        let channel = InMemoryChannel::recording();
        let shared: SharedChannel = Arc::new(channel.clone());
        let subjects = SagaSubjects::defaults::<CreateUserSaga>();
        let listener = Arc::new(RecordingListener::default());

        let orchestrator = Orchestrator::with_listener(
            shared.clone(),
            repository,
            subjects.clone(),
            OrchestratorConfig::default(),
            listener.clone(),
        )
        .await
        .unwrap();

        let credentials = InMemoryCredentialsStore::new();
        let profiles = InMemoryProfileStore::new();
        let graph = InMemoryGraphStore::new();

        let mut participants = Vec::new();
        if services.credentials {
            participants.push(
                credentials_participant(
                    shared.clone(),
                    subjects.clone(),
                    Arc::new(credentials.clone()),
                )
                .await
                .unwrap(),
            );
        }
        if services.profile {
            participants.push(
                profile_participant(shared.clone(), subjects.clone(), Arc::new(profiles.clone()))
                    .await
                    .unwrap(),
            );
        }
        if services.graph {
            participants.push(
                graph_participant(shared.clone(), subjects.clone(), Arc::new(graph.clone()))
                    .await
                    .unwrap(),
            );
        }

        Self {
            channel,
            orchestrator,
            listener,
            credentials,
            profiles,
            graph,
            participants,
        }
    }

    async fn instance(&self) -> SagaInstance {
        self.orchestrator.get(USER_ID).await.unwrap().unwrap()
    }

    async fn commands(&self, step: CreateUserCommand) -> usize {
        let subject = self.orchestrator.subjects().command_subject(step);
        self.channel.published(&subject).await.len()
    }
}

#[tokio::test]
async fn test_user_is_created_in_every_store() {
    let h = UserHarness::new().await;

    h.orchestrator.start(alice()).await.unwrap();
    h.channel.settle().await;

    let saga = h.instance().await;
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert_eq!(
        saga.completed_steps(),
        &["UpdateCredentials", "UpdateProfile", "UpdateGraph"]
    );
    assert!(saga.pending().is_none());

    assert!(h.credentials.contains(USER_ID).await);
    assert!(h.profiles.contains(USER_ID).await);
    assert!(h.graph.contains(USER_ID).await);

    // Three commands and three replies; nothing after GraphUpdated.
    assert_eq!(h.channel.published_count().await, 6);
    assert_eq!(h.listener.statuses().await, vec![SagaStatus::Completed]);
}

#[tokio::test]
async fn test_credentials_failure_fails_saga_without_touching_other_stores() {
    let h = UserHarness::new().await;
    h.credentials.set_fail_on_upsert(true).await;

    h.orchestrator.start(alice()).await.unwrap();
    h.channel.settle().await;

    let saga = h.instance().await;
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(
        saga.failure_reason()
            .unwrap()
            .contains("credentials store unavailable")
    );
    assert!(saga.compensated_steps().is_empty());

    assert!(!h.profiles.contains(USER_ID).await);
    assert!(!h.graph.contains(USER_ID).await);
    assert_eq!(h.commands(CreateUserCommand::UpdateProfile).await, 0);
    assert_eq!(h.listener.statuses().await, vec![SagaStatus::Failed]);
}

#[tokio::test]
async fn test_unanswered_command_is_retried_then_failed() {
    let h = UserHarness::build(
        Arc::new(InMemorySagaRepository::new()),
        Services {
            credentials: false,
            ..Services::ALL
        },
    )
    .await;

    h.orchestrator.start(alice()).await.unwrap();
    h.channel.settle().await;
    assert_eq!(h.instance().await.status(), SagaStatus::Running);

    // Nothing is overdue yet.
    let report = h.orchestrator.sweep(Utc::now()).await.unwrap();
    assert_eq!(report.retried, 0);

    for attempt in 2..=3 {
        let deadline = h.instance().await.pending().unwrap().deadline;
        let report = h
            .orchestrator
            .sweep(deadline + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(report.retried, 1);
        assert_eq!(h.instance().await.pending().unwrap().attempt, attempt);
    }
    assert_eq!(h.commands(CreateUserCommand::UpdateCredentials).await, 3);

    let deadline = h.instance().await.pending().unwrap().deadline;
    let report = h
        .orchestrator
        .sweep(deadline + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let saga = h.instance().await;
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(saga.failure_reason().unwrap().contains("timed out"));
    assert!(!h.profiles.contains(USER_ID).await);
    assert_eq!(h.listener.statuses().await, vec![SagaStatus::Failed]);
}

#[tokio::test]
async fn test_redelivered_command_writes_once_and_reply_is_ignored() {
    let h = UserHarness::new().await;
    h.orchestrator.start(alice()).await.unwrap();
    h.channel.settle().await;

    let subject = h
        .orchestrator
        .subjects()
        .command_subject(CreateUserCommand::UpdateProfile);
    let command = Command::<CreateUserSaga>::new(alice(), CreateUserCommand::UpdateProfile);
    h.channel.publish_json(&subject, &command).await.unwrap();
    h.channel.settle().await;

    assert_eq!(h.profiles.count().await, 1);
    assert_eq!(h.commands(CreateUserCommand::UpdateGraph).await, 1);
    assert_eq!(h.instance().await.status(), SagaStatus::Completed);
}

#[tokio::test]
async fn test_duplicate_reply_is_ignored() {
    let h = UserHarness::build(Arc::new(InMemorySagaRepository::new()), Services::NONE).await;
    h.orchestrator.start(alice()).await.unwrap();

    let reply = Reply::<CreateUserSaga>::new(alice(), CreateUserReply::CredentialsUpdated);
    let first = h.orchestrator.on_reply(reply.clone()).await.unwrap();
    let second = h.orchestrator.on_reply(reply).await.unwrap();

    assert_eq!(first, ReplyDisposition::Dispatched("UpdateProfile"));
    assert_eq!(second, ReplyDisposition::Duplicate);
    assert_eq!(h.commands(CreateUserCommand::UpdateProfile).await, 1);
}

#[tokio::test]
async fn test_reply_for_unknown_instance_is_orphaned() {
    let h = UserHarness::build(Arc::new(InMemorySagaRepository::new()), Services::NONE).await;

    let reply = Reply::<CreateUserSaga>::new(alice(), CreateUserReply::CredentialsUpdated);
    let disposition = h.orchestrator.on_reply(reply).await.unwrap();

    assert_eq!(disposition, ReplyDisposition::Orphaned);
    assert_eq!(h.channel.published_count().await, 0);
}

#[tokio::test]
async fn test_unknown_reply_aborts_saga() {
    let h = UserHarness::build(Arc::new(InMemorySagaRepository::new()), Services::NONE).await;
    h.orchestrator.start(alice()).await.unwrap();

    let reply = Reply::<CreateUserSaga>::new(alice(), CreateUserReply::Unknown);
    let disposition = h.orchestrator.on_reply(reply).await.unwrap();

    assert_eq!(disposition, ReplyDisposition::Aborted);
    let saga = h.instance().await;
    assert_eq!(saga.status(), SagaStatus::Aborted);
    assert_eq!(h.listener.statuses().await, vec![SagaStatus::Aborted]);
}

#[tokio::test]
async fn test_graph_failure_rolls_back_profile_then_credentials() {
    let h = UserHarness::new().await;
    h.graph.set_fail_on_upsert(true).await;

    h.orchestrator.start(alice()).await.unwrap();
    h.channel.settle().await;

    let saga = h.instance().await;
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(saga.completed_steps(), &["UpdateCredentials", "UpdateProfile"]);
    assert_eq!(
        saga.compensated_steps(),
        &["RollbackProfile", "RollbackCredentials"]
    );
    assert!(saga.failure_reason().unwrap().contains("graph store unavailable"));

    assert!(!h.credentials.contains(USER_ID).await);
    assert!(!h.profiles.contains(USER_ID).await);
    assert!(!h.graph.contains(USER_ID).await);
}

#[tokio::test]
async fn test_failed_rollback_stops_compensation() {
    let h = UserHarness::new().await;
    h.graph.set_fail_on_upsert(true).await;
    h.profiles.set_fail_on_remove(true).await;

    h.orchestrator.start(alice()).await.unwrap();
    h.channel.settle().await;

    let saga = h.instance().await;
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(saga.compensated_steps().is_empty());
    assert!(saga.failure_reason().unwrap().starts_with("RollbackProfile"));
    assert_eq!(h.commands(CreateUserCommand::RollbackCredentials).await, 0);
    // Left for manual intervention.
    assert!(h.credentials.contains(USER_ID).await);
}

#[tokio::test]
async fn test_late_rollback_failure_does_not_end_credentials_rollback() {
    let h = UserHarness::build(Arc::new(InMemorySagaRepository::new()), Services::NONE).await;
    h.orchestrator.start(alice()).await.unwrap();

    let answer = |step| Reply::<CreateUserSaga>::new(alice(), step);
    let steps = [
        (answer(CreateUserReply::CredentialsUpdated), "UpdateProfile"),
        (answer(CreateUserReply::ProfileUpdated), "UpdateGraph"),
        (
            Reply::failed(alice(), CreateUserReply::GraphFailed, "graph store unavailable"),
            "RollbackProfile",
        ),
        (answer(CreateUserReply::ProfileRolledBack), "RollbackCredentials"),
    ];
    for (reply, next) in steps {
        let disposition = h.orchestrator.on_reply(reply).await.unwrap();
        assert_eq!(disposition, ReplyDisposition::Dispatched(next));
    }

    // A profile rollback failure arriving late must not be taken as the
    // answer to the credentials rollback.
    let late = Reply::<CreateUserSaga>::failed(
        alice(),
        CreateUserReply::ProfileRollbackFailed,
        "profile store unavailable",
    );
    let disposition = h.orchestrator.on_reply(late).await.unwrap();
    assert_eq!(disposition, ReplyDisposition::Duplicate);
    let saga = h.instance().await;
    assert_eq!(saga.status(), SagaStatus::Compensating);
    assert_eq!(saga.pending().unwrap().step, "RollbackCredentials");

    let disposition = h
        .orchestrator
        .on_reply(answer(CreateUserReply::CredentialsRolledBack))
        .await
        .unwrap();
    assert_eq!(disposition, ReplyDisposition::Failed);
    let saga = h.instance().await;
    assert_eq!(
        saga.compensated_steps(),
        &["RollbackProfile", "RollbackCredentials"]
    );
    assert!(saga.failure_reason().unwrap().starts_with("UpdateGraph"));
}

#[tokio::test]
async fn test_reply_from_previous_run_is_ignored_after_restart() {
    let h = UserHarness::build(Arc::new(InMemorySagaRepository::new()), Services::NONE).await;
    h.orchestrator.start(alice()).await.unwrap();
    let first_run = h.instance().await.run_id();
    assert!(first_run.is_some());

    let rejected = Reply::<CreateUserSaga>::failed(
        alice(),
        CreateUserReply::CredentialsFailed,
        "username taken",
    )
    .in_run(first_run);
    h.orchestrator.on_reply(rejected).await.unwrap();
    assert_eq!(h.instance().await.status(), SagaStatus::Failed);

    h.orchestrator.start(alice()).await.unwrap();
    let second_run = h.instance().await.run_id();
    assert_ne!(second_run, first_run);

    // Both runs wait on UpdateCredentials, so only the run id tells a
    // late reply of the first run apart.
    let subject = h
        .orchestrator
        .subjects()
        .command_subject(CreateUserCommand::UpdateCredentials);
    let sent: Vec<Command<CreateUserSaga>> = h
        .channel
        .published(&subject)
        .await
        .iter()
        .map(|m| m.decode().unwrap())
        .collect();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].run_id, first_run);
    assert_eq!(sent[1].run_id, second_run);

    let stale = Reply::<CreateUserSaga>::new(alice(), CreateUserReply::CredentialsUpdated)
        .in_run(first_run);
    let disposition = h.orchestrator.on_reply(stale).await.unwrap();
    assert_eq!(disposition, ReplyDisposition::Duplicate);
    assert_eq!(h.commands(CreateUserCommand::UpdateProfile).await, 0);
    assert_eq!(h.instance().await.pending().unwrap().step, "UpdateCredentials");

    let current = Reply::<CreateUserSaga>::new(alice(), CreateUserReply::CredentialsUpdated)
        .in_run(second_run);
    let disposition = h.orchestrator.on_reply(current).await.unwrap();
    assert_eq!(disposition, ReplyDisposition::Dispatched("UpdateProfile"));
}

#[tokio::test]
async fn test_participant_echoes_run_id() {
    let h = UserHarness::new().await;
    let credentials = h
        .participants
        .iter()
        .find(|p| p.name() == "credentials-service")
        .unwrap();
    let run = Some(EntityId::new());

    let reply = credentials
        .process(Command::new(alice(), CreateUserCommand::UpdateCredentials).in_run(run))
        .await;

    assert_eq!(reply.step, CreateUserReply::CredentialsUpdated);
    assert_eq!(reply.run_id, run);
}

#[tokio::test]
async fn test_command_for_unbound_step_gets_unknown_reply() {
    let h = UserHarness::new().await;
    let graph = h
        .participants
        .iter()
        .find(|p| p.name() == "graph-service")
        .unwrap();

    let reply = graph
        .process(Command::new(alice(), CreateUserCommand::RollbackProfile))
        .await;

    assert_eq!(reply.step, CreateUserReply::Unknown);
    assert!(reply.error.is_some());
    assert_eq!(h.graph.node_count().await, 0);
}

#[tokio::test]
async fn test_second_start_while_running_is_rejected() {
    let h = UserHarness::build(Arc::new(InMemorySagaRepository::new()), Services::NONE).await;
    h.orchestrator.start(alice()).await.unwrap();

    let err = h.orchestrator.start(alice()).await.unwrap_err();
    assert!(matches!(err, SagaError::AlreadyStarted { .. }));
}

#[tokio::test]
async fn test_invalid_user_is_rejected_before_start() {
    let h = UserHarness::new().await;
    let mut user = alice();
    user.email = "not-an-email".to_string();

    let err = h.orchestrator.start(user).await.unwrap_err();
    assert!(matches!(err, SagaError::Domain(_)));
    assert!(h.orchestrator.get(USER_ID).await.unwrap().is_none());
    assert_eq!(h.channel.published_count().await, 0);
}

#[tokio::test]
async fn test_failed_initial_publish_marks_saga_failed() {
    let h = UserHarness::new().await;
    h.channel.set_fail_on_publish(true).await;

    let err = h.orchestrator.start(alice()).await.unwrap_err();
    assert!(matches!(err, SagaError::Channel(_)));
    let saga = h.instance().await;
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert!(
        saga.failure_reason()
            .unwrap()
            .starts_with("initial publish failed")
    );

    // The saga can be started again once the channel is back.
    h.channel.set_fail_on_publish(false).await;
    h.orchestrator.start(alice()).await.unwrap();
    h.channel.settle().await;
    assert_eq!(h.instance().await.status(), SagaStatus::Completed);
}

#[tokio::test]
async fn test_recover_republishes_pending_command_after_restart() {
    let repository: Arc<dyn SagaRepository> = Arc::new(InMemorySagaRepository::new());

    // First process dies after persisting and publishing into the void.
    let crashed = UserHarness::build(repository.clone(), Services::NONE).await;
    crashed.orchestrator.start(alice()).await.unwrap();
    crashed.orchestrator.shutdown().await.unwrap();

    let h = UserHarness::build(repository, Services::ALL).await;
    let republished = h.orchestrator.recover().await.unwrap();
    h.channel.settle().await;

    assert_eq!(republished, 1);
    assert_eq!(h.instance().await.status(), SagaStatus::Completed);
    assert!(h.graph.contains(USER_ID).await);
}

#[tokio::test]
async fn test_sweeper_recovers_on_start_and_stops_on_shutdown() {
    let repository: Arc<dyn SagaRepository> = Arc::new(InMemorySagaRepository::new());
    let crashed = UserHarness::build(repository.clone(), Services::NONE).await;
    crashed.orchestrator.start(alice()).await.unwrap();
    crashed.orchestrator.shutdown().await.unwrap();

    let h = UserHarness::build(repository, Services::ALL).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = SagaSweeper::new(std::time::Duration::from_millis(10))
        .with(Arc::new(h.orchestrator.clone()));
    let task = tokio::spawn(sweeper.run(shutdown_rx));

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            h.channel.settle().await;
            if h.instance().await.status() == SagaStatus::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    task.await.unwrap();
}

struct EventHarness {
    channel: InMemoryChannel,
    orchestrator: Orchestrator<CreateEventSaga>,
    log: InMemoryEventLogStore,
    reports: InMemoryReportStore,
}

impl EventHarness {
    async fn new() -> Self {
        let channel = InMemoryChannel::new();
        let shared: SharedChannel = Arc::new(channel.clone());
        let subjects = SagaSubjects::defaults::<CreateEventSaga>();

        let orchestrator = Orchestrator::new(
            shared.clone(),
            Arc::new(InMemorySagaRepository::new()),
            subjects.clone(),
            OrchestratorConfig::default(),
        )
        .await
        .unwrap();

        let log = InMemoryEventLogStore::new();
        let reports = InMemoryReportStore::new();
        event_log_participant(shared.clone(), subjects.clone(), Arc::new(log.clone()))
            .await
            .unwrap();
        report_participant(shared, subjects, Arc::new(reports.clone()))
            .await
            .unwrap();

        Self {
            channel,
            orchestrator,
            log,
            reports,
        }
    }
}

#[tokio::test]
async fn test_engagement_event_reaches_log_and_report() {
    use saga::services::ReportStore;

    let h = EventHarness::new().await;
    let tweet = EntityId::new();
    let event = EngagementEvent::new(tweet, EngagementKind::Liked);

    h.orchestrator.start(event.clone()).await.unwrap();
    h.channel.settle().await;

    let saga = h.orchestrator.get(event.event_id).await.unwrap().unwrap();
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert_eq!(h.log.count().await, 1);
    let report = h.reports.get(tweet, event.day()).await.unwrap().unwrap();
    assert_eq!(report.likes, 1);

    // Running the same event again does not double count it.
    h.orchestrator.start(event.clone()).await.unwrap();
    h.channel.settle().await;
    let report = h.reports.get(tweet, event.day()).await.unwrap().unwrap();
    assert_eq!(report.likes, 1);
    assert_eq!(h.log.count().await, 1);
}

#[tokio::test]
async fn test_report_failure_removes_log_entry() {
    let h = EventHarness::new().await;
    h.reports.set_fail_on_apply(true).await;
    let event = EngagementEvent::new(EntityId::new(), EngagementKind::TimeSpent { seconds: 20 });

    h.orchestrator.start(event.clone()).await.unwrap();
    h.channel.settle().await;

    let saga = h.orchestrator.get(event.event_id).await.unwrap().unwrap();
    assert_eq!(saga.status(), SagaStatus::Failed);
    assert_eq!(saga.compensated_steps(), &["RollbackEventLog"]);
    assert_eq!(h.log.count().await, 0);
}
