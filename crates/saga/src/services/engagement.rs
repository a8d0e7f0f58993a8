//! Engagement event log and daily report, the two stores of the
//! event-propagation saga.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::EntityId;
use domain::{EngagementEvent, EngagementKind};
use messaging::SharedChannel;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::event_propagation::{CreateEventCommand, CreateEventSaga};
use crate::message::SagaSubjects;
use crate::participant::{Participant, StepHandler};

/// Queue group of the event log service.
pub const EVENT_LOG_SERVICE: &str = "event-log-service";
/// Queue group of the report service.
pub const REPORT_SERVICE: &str = "report-service";

#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Records an event. Recording an event id twice is a no-op.
    async fn insert(&self, event: EngagementEvent) -> Result<()>;

    async fn remove(&self, event_id: EntityId) -> Result<()>;

    async fn get(&self, event_id: EntityId) -> Result<Option<EngagementEvent>>;
}

#[derive(Debug, Default)]
struct InMemoryEventLogState {
    events: HashMap<EntityId, EngagementEvent>,
    fail_on_insert: bool,
}

/// In-memory event log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventLogStore {
    state: Arc<RwLock<InMemoryEventLogState>>,
}

impl InMemoryEventLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().await.fail_on_insert = fail;
    }

    pub async fn count(&self) -> usize {
        self.state.read().await.events.len()
    }
}

#[async_trait]
impl EventLogStore for InMemoryEventLogStore {
    async fn insert(&self, event: EngagementEvent) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_insert {
            return Err(SagaError::EngagementStore(
                "event log unavailable".to_string(),
            ));
        }
        state.events.entry(event.event_id).or_insert(event);
        Ok(())
    }

    async fn remove(&self, event_id: EntityId) -> Result<()> {
        self.state.write().await.events.remove(&event_id);
        Ok(())
    }

    async fn get(&self, event_id: EntityId) -> Result<Option<EngagementEvent>> {
        Ok(self.state.read().await.events.get(&event_id).cloned())
    }
}

/// Engagement totals for one tweet on one day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyReport {
    pub likes: u64,
    pub unlikes: u64,
    pub views: u64,
    pub time_spent_seconds: u64,
}

impl DailyReport {
    fn record(&mut self, kind: EngagementKind) {
        match kind {
            EngagementKind::Liked => self.likes += 1,
            EngagementKind::Unliked => self.unlikes += 1,
            EngagementKind::Viewed => self.views += 1,
            EngagementKind::TimeSpent { seconds } => {
                self.time_spent_seconds += u64::from(seconds);
            }
        }
    }
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Adds an event to its tweet's daily totals. Each event id counts once.
    async fn apply(&self, event: &EngagementEvent) -> Result<()>;

    async fn get(&self, tweet_id: EntityId, day: NaiveDate) -> Result<Option<DailyReport>>;
}

#[derive(Debug, Default)]
struct InMemoryReportState {
    reports: HashMap<(EntityId, NaiveDate), DailyReport>,
    applied: HashSet<EntityId>,
    fail_on_apply: bool,
}

/// In-memory report store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReportStore {
    state: Arc<RwLock<InMemoryReportState>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_apply(&self, fail: bool) {
        self.state.write().await.fail_on_apply = fail;
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn apply(&self, event: &EngagementEvent) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_apply {
            return Err(SagaError::EngagementStore(
                "report store unavailable".to_string(),
            ));
        }
        if !state.applied.insert(event.event_id) {
            return Ok(());
        }
        state
            .reports
            .entry((event.tweet_id, event.day()))
            .or_default()
            .record(event.kind);
        Ok(())
    }

    async fn get(&self, tweet_id: EntityId, day: NaiveDate) -> Result<Option<DailyReport>> {
        Ok(self.state.read().await.reports.get(&(tweet_id, day)).copied())
    }
}

/// Handles `UpdateEventLog`.
pub struct AppendEventLog {
    store: Arc<dyn EventLogStore>,
}

impl AppendEventLog {
    pub fn new(store: Arc<dyn EventLogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler<EngagementEvent> for AppendEventLog {
    async fn apply(&self, event: EngagementEvent) -> Result<EngagementEvent> {
        self.store.insert(event.clone()).await?;
        Ok(event)
    }
}

/// Handles `RollbackEventLog`.
pub struct RemoveEventLogEntry {
    store: Arc<dyn EventLogStore>,
}

impl RemoveEventLogEntry {
    pub fn new(store: Arc<dyn EventLogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler<EngagementEvent> for RemoveEventLogEntry {
    async fn apply(&self, event: EngagementEvent) -> Result<EngagementEvent> {
        self.store.remove(event.event_id).await?;
        Ok(event)
    }
}

/// Handles `UpdateReport`.
pub struct UpdateDailyReport {
    store: Arc<dyn ReportStore>,
}

impl UpdateDailyReport {
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepHandler<EngagementEvent> for UpdateDailyReport {
    async fn apply(&self, event: EngagementEvent) -> Result<EngagementEvent> {
        self.store.apply(&event).await?;
        Ok(event)
    }
}

/// Subscribes the event log service to its event-propagation steps.
pub async fn event_log_participant(
    channel: SharedChannel,
    subjects: SagaSubjects,
    store: Arc<dyn EventLogStore>,
) -> Result<Participant<CreateEventSaga>> {
    Participant::builder(EVENT_LOG_SERVICE, channel, subjects)
        .bind(
            CreateEventCommand::UpdateEventLog,
            AppendEventLog::new(store.clone()),
        )
        .bind(
            CreateEventCommand::RollbackEventLog,
            RemoveEventLogEntry::new(store),
        )
        .subscribe()
        .await
}

/// Subscribes the report service to its event-propagation step.
pub async fn report_participant(
    channel: SharedChannel,
    subjects: SagaSubjects,
    store: Arc<dyn ReportStore>,
) -> Result<Participant<CreateEventSaga>> {
    Participant::builder(REPORT_SERVICE, channel, subjects)
        .bind(CreateEventCommand::UpdateReport, UpdateDailyReport::new(store))
        .subscribe()
        .await
}
