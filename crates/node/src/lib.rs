//! A saga node.
//!
//! Hosts the user-creation and event-propagation orchestrators together with
//! the participants that own the credentials, profile, graph, event log and
//! report stores, all attached to one message channel. A small HTTP
//! surface starts sagas and exposes health, Prometheus metrics and saga
//! instance lookup.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use messaging::SharedChannel;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::services::{
    InMemoryCredentialsStore, InMemoryEventLogStore, InMemoryGraphStore, InMemoryProfileStore,
    InMemoryReportStore, credentials_participant, event_log_participant, graph_participant,
    profile_participant, report_participant,
};
use saga::{
    CreateEventSaga, CreateUserSaga, Orchestrator, Participant, SagaDefinition, SagaRepository,
    SagaSweeper,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// State shared by the HTTP handlers.
pub struct AppState {
    pub users: Orchestrator<CreateUserSaga>,
    pub events: Orchestrator<CreateEventSaga>,
}

impl AppState {
    pub fn saga_types(&self) -> Vec<&'static str> {
        vec![CreateUserSaga::SAGA_TYPE, CreateEventSaga::SAGA_TYPE]
    }
}

/// Creates the Axum router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas/CreateUser", post(routes::sagas::create_user))
        .route("/sagas/CreateEvent", post(routes::sagas::create_event))
        .route(
            "/sagas/{saga_type}/{correlation_id}",
            get(routes::sagas::get),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// The participant-owned stores hosted by a node.
#[derive(Debug, Clone, Default)]
pub struct Stores {
    pub credentials: InMemoryCredentialsStore,
    pub profiles: InMemoryProfileStore,
    pub graph: InMemoryGraphStore,
    pub event_log: InMemoryEventLogStore,
    pub reports: InMemoryReportStore,
}

struct Participants {
    credentials: Participant<CreateUserSaga>,
    profile: Participant<CreateUserSaga>,
    graph: Participant<CreateUserSaga>,
    event_log: Participant<CreateEventSaga>,
    report: Participant<CreateEventSaga>,
}

/// Orchestrators and participants wired onto one channel.
pub struct Node {
    pub state: Arc<AppState>,
    pub stores: Stores,
    participants: Participants,
}

impl Node {
    /// Subscribes every participant and orchestrator to `channel`.
    pub async fn bootstrap(
        config: &Config,
        channel: SharedChannel,
        repository: Arc<dyn SagaRepository>,
    ) -> saga::Result<Self> {
        let stores = Stores::default();
        let users = &config.user_subjects;
        let events = &config.event_subjects;

        let participants = Participants {
            credentials: credentials_participant(
                channel.clone(),
                users.clone(),
                Arc::new(stores.credentials.clone()),
            )
            .await?,
            profile: profile_participant(
                channel.clone(),
                users.clone(),
                Arc::new(stores.profiles.clone()),
            )
            .await?,
            graph: graph_participant(
                channel.clone(),
                users.clone(),
                Arc::new(stores.graph.clone()),
            )
            .await?,
            event_log: event_log_participant(
                channel.clone(),
                events.clone(),
                Arc::new(stores.event_log.clone()),
            )
            .await?,
            report: report_participant(
                channel.clone(),
                events.clone(),
                Arc::new(stores.reports.clone()),
            )
            .await?,
        };

        let state = Arc::new(AppState {
            users: Orchestrator::new(
                channel.clone(),
                repository.clone(),
                users.clone(),
                config.orchestrator_config(),
            )
            .await?,
            events: Orchestrator::new(
                channel,
                repository,
                events.clone(),
                config.orchestrator_config(),
            )
            .await?,
        });

        tracing::info!(sagas = ?state.saga_types(), "node bootstrapped");

        Ok(Self {
            state,
            stores,
            participants,
        })
    }

    /// A sweeper over both orchestrators.
    pub fn sweeper(&self, interval: Duration) -> SagaSweeper {
        SagaSweeper::new(interval)
            .with(Arc::new(self.state.users.clone()))
            .with(Arc::new(self.state.events.clone()))
    }

    /// Unsubscribes orchestrators first so no new commands go out, then
    /// the participants.
    pub async fn shutdown(&self) -> saga::Result<()> {
        self.state.users.shutdown().await?;
        self.state.events.shutdown().await?;

        let p = &self.participants;
        p.credentials.shutdown().await?;
        p.profile.shutdown().await?;
        p.graph.shutdown().await?;
        p.event_log.shutdown().await?;
        p.report.shutdown().await?;

        tracing::info!("node stopped");
        Ok(())
    }
}
