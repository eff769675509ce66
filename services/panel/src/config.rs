//! Process configuration from environment variables.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventBusKind {
    Postgres,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub log_level: String,
    pub heartbeat_timeout: Duration,
    pub sweep_interval: Duration,
    pub register_timeout: Duration,
    pub status_interval: Duration,
    pub traffic_interval: Duration,
    pub alive_interval: Duration,
    pub event_bus: EventBusKind,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} must be a positive integer number of seconds, got '{value}'")]
    InvalidSeconds { name: &'static str, value: String },
    #[error("EVENT_BUS must be 'postgres' or 'local', got '{0}'")]
    InvalidEventBus(String),
}

impl PanelConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parses configuration from any name -> value lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let seconds = |name: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match get(name) {
                None => Ok(Duration::from_secs(default)),
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
                    _ => Err(ConfigError::InvalidSeconds { name, value: raw }),
                },
            }
        };

        let event_bus = match get("EVENT_BUS").as_deref().map(str::trim) {
            None | Some("postgres") => EventBusKind::Postgres,
            Some("local") => EventBusKind::Local,
            Some(other) => return Err(ConfigError::InvalidEventBus(other.to_owned())),
        };

        Ok(Self {
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            heartbeat_timeout: seconds("HEARTBEAT_TIMEOUT_SECS", 120)?,
            sweep_interval: seconds("SWEEP_INTERVAL_SECS", 30)?,
            register_timeout: seconds("REGISTER_TIMEOUT_SECS", 10)?,
            status_interval: seconds("STATUS_INTERVAL_SECS", 60)?,
            traffic_interval: seconds("TRAFFIC_INTERVAL_SECS", 60)?,
            alive_interval: seconds("ALIVE_INTERVAL_SECS", 30)?,
            event_bus,
        })
    }
}
