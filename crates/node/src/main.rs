//! Saga node entry point.

use std::sync::Arc;

use messaging::{InMemoryChannel, SharedChannel};
use node::Node;
use node::config::{Config, LogFormat};
use saga::{InMemorySagaRepository, PostgresSagaRepository, SagaRepository};
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[cfg(feature = "nats")]
async fn connect_channel(config: &Config) -> SharedChannel {
    match &config.nats_url {
        Some(url) => {
            let nats = messaging::NatsChannelConfig {
                url: url.clone(),
                stream: config.nats_stream.clone(),
                subjects: config.stream_subjects(),
                ..Default::default()
            };
            Arc::new(
                messaging::NatsChannel::connect(&nats)
                    .await
                    .expect("failed to connect to NATS"),
            )
        }
        None => Arc::new(InMemoryChannel::new()),
    }
}

#[cfg(not(feature = "nats"))]
async fn connect_channel(config: &Config) -> SharedChannel {
    if config.nats_url.is_some() {
        tracing::warn!("NATS_URL is set but the nats feature is disabled; using the in-memory channel");
    }
    Arc::new(InMemoryChannel::new())
}

async fn open_repository(config: &Config) -> Arc<dyn SagaRepository> {
    match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to Postgres");
            let repository = PostgresSagaRepository::new(pool);
            repository
                .run_migrations()
                .await
                .expect("failed to run saga migrations");
            Arc::new(repository)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; saga instances are kept in memory");
            Arc::new(InMemorySagaRepository::new())
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Tracing and the Prometheus recorder
    init_tracing(&config);
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 2. Transport and saga storage
    let channel = connect_channel(&config).await;
    let repository = open_repository(&config).await;

    // 3. Orchestrators, participants and the sweeper
    let node = Node::bootstrap(&config, channel, repository)
        .await
        .expect("failed to bootstrap node");
    let (stop_sweeper, sweeper_shutdown) = watch::channel(false);
    let sweeper = tokio::spawn(node.sweeper(config.sweep_interval).run(sweeper_shutdown));

    // 4. HTTP surface
    let app = node::create_app(node.state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting saga node");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = stop_sweeper.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "sweeper task panicked");
    }
    if let Err(e) = node.shutdown().await {
        tracing::error!(error = %e, "node shutdown failed");
    }

    tracing::info!("node shut down gracefully");
}
