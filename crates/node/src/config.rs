//! Node configuration loaded from environment variables.

use std::time::Duration;

use saga::{CreateEventSaga, CreateUserSaga, OrchestratorConfig, SagaSubjects};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Node configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: HTTP bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `NATS_URL`: NATS server; the in-memory channel is used when unset
/// - `NATS_STREAM`: JetStream stream holding the saga subjects (`SAGAS`)
/// - `DATABASE_URL`: Postgres for saga instances; kept in memory when unset
/// - `CREATE_USER_COMMAND_SUBJECT`, `CREATE_USER_REPLY_SUBJECT`,
///   `CREATE_EVENT_COMMAND_SUBJECT`, `CREATE_EVENT_REPLY_SUBJECT`
/// - `SAGA_STEP_TIMEOUT_SECS` (30), `SAGA_MAX_ATTEMPTS` (3),
///   `SAGA_SWEEP_INTERVAL_SECS` (5)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub nats_url: Option<String>,
    pub nats_stream: String,
    pub database_url: Option<String>,
    pub user_subjects: SagaSubjects,
    pub event_subjects: SagaSubjects,
    pub step_timeout: Duration,
    pub max_attempts: u32,
    pub sweep_interval: Duration,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: var_or("HOST", &defaults.host),
            port: parsed_or("PORT", defaults.port),
            log_level: var_or("RUST_LOG", &defaults.log_level),
            log_format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            nats_url: non_empty("NATS_URL"),
            nats_stream: var_or("NATS_STREAM", &defaults.nats_stream),
            database_url: non_empty("DATABASE_URL"),
            user_subjects: SagaSubjects::new(
                var_or("CREATE_USER_COMMAND_SUBJECT", &defaults.user_subjects.command),
                var_or("CREATE_USER_REPLY_SUBJECT", &defaults.user_subjects.reply),
            ),
            event_subjects: SagaSubjects::new(
                var_or("CREATE_EVENT_COMMAND_SUBJECT", &defaults.event_subjects.command),
                var_or("CREATE_EVENT_REPLY_SUBJECT", &defaults.event_subjects.reply),
            ),
            step_timeout: Duration::from_secs(parsed_or(
                "SAGA_STEP_TIMEOUT_SECS",
                defaults.step_timeout.as_secs(),
            )),
            max_attempts: parsed_or("SAGA_MAX_ATTEMPTS", defaults.max_attempts),
            sweep_interval: Duration::from_secs(parsed_or(
                "SAGA_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Every subject the node publishes to: all commands of both sagas and
    /// their reply subjects.
    pub fn stream_subjects(&self) -> Vec<String> {
        [&self.user_subjects, &self.event_subjects]
            .into_iter()
            .flat_map(|s| [format!("{}.>", s.command), s.reply.clone()])
            .collect()
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            step_timeout: self.step_timeout,
            max_attempts: self.max_attempts,
            ..OrchestratorConfig::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            nats_url: None,
            nats_stream: "SAGAS".to_string(),
            database_url: None,
            user_subjects: SagaSubjects::defaults::<CreateUserSaga>(),
            event_subjects: SagaSubjects::defaults::<CreateEventSaga>(),
            step_timeout: orchestrator.step_timeout,
            max_attempts: orchestrator.max_attempts,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.nats_url.is_none());
        assert!(config.database_url.is_none());
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_default_subjects() {
        let config = Config::default();
        assert_eq!(config.user_subjects.command, "create-user-command");
        assert_eq!(config.user_subjects.reply, "create-user-reply");
        assert_eq!(config.event_subjects.command, "create-event-command");
        assert_eq!(config.event_subjects.reply, "create-event-reply");
    }

    #[test]
    fn test_stream_subjects_cover_commands_and_replies() {
        let config = Config::default();
        assert_eq!(config.nats_stream, "SAGAS");
        assert_eq!(
            config.stream_subjects(),
            vec![
                "create-user-command.>",
                "create-user-reply",
                "create-event-command.>",
                "create-event-reply",
            ]
        );
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_orchestrator_config_carries_timeouts() {
        let config = Config {
            step_timeout: Duration::from_secs(2),
            max_attempts: 7,
            ..Config::default()
        };
        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.step_timeout, Duration::from_secs(2));
        assert_eq!(orchestrator.max_attempts, 7);
        assert_eq!(
            orchestrator.max_conflict_retries,
            OrchestratorConfig::default().max_conflict_retries
        );
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Text);
    }
}
