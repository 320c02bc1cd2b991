//! Application configuration loaded from environment variables.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use intake::{IntakeConfig, RedisStreamsConfig};
use ledger_store::PostgresConfig;
use thiserror::Error;

/// How long one bus fetch blocks waiting for new events.
const EVENT_BUS_BLOCK: Duration = Duration::from_secs(1);

/// Fatal configuration error; the process must not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Service configuration.
///
/// Reads from environment variables:
/// - `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`, `DB_NAME` (required)
/// - `HOST` (default `0.0.0.0`), `PORT` (default `3004`)
/// - `EVENT_BUS_URL`, `ORDER_EVENTS_STREAM`, `ORDER_EVENTS_GROUP`,
///   `ORDER_EVENTS_CONSUMER`
/// - `DB_MAX_CONNECTIONS`, `STORE_TIMEOUT_MS`
/// - `DEDUP_CAPACITY`, `DEDUP_TTL_SECS`, `EVENT_ID_BUCKET_SECS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: PostgresConfig,
    pub event_bus: RedisStreamsConfig,
    pub intake: IntakeConfig,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let database = PostgresConfig {
            host: vars.required("DB_HOST")?,
            port: vars.required_parsed("DB_PORT")?,
            user: vars.required("DB_USER")?,
            password: vars.required("DB_PASSWORD")?,
            database: vars.required("DB_NAME")?,
            max_connections: vars.parsed("DB_MAX_CONNECTIONS", 10)?,
            timeout: Duration::from_millis(vars.parsed("STORE_TIMEOUT_MS", 5000)?),
        };

        let event_bus = RedisStreamsConfig {
            url: vars.or("EVENT_BUS_URL", "redis://127.0.0.1:6379"),
            stream: vars.or("ORDER_EVENTS_STREAM", "ORDER_CREATED"),
            group: vars.or("ORDER_EVENTS_GROUP", "inventory"),
            consumer: vars.or("ORDER_EVENTS_CONSUMER", "inventory-worker"),
            block: EVENT_BUS_BLOCK,
        };

        let defaults = IntakeConfig::default();
        let intake = IntakeConfig {
            dedup_capacity: vars.parsed("DEDUP_CAPACITY", defaults.dedup_capacity)?,
            dedup_ttl: Duration::from_secs(
                vars.parsed("DEDUP_TTL_SECS", defaults.dedup_ttl.as_secs())?,
            ),
            bucket_secs: vars.positive("EVENT_ID_BUCKET_SECS", defaults.bucket_secs)?,
            ..defaults
        };

        Ok(Self {
            host: vars.or("HOST", "0.0.0.0"),
            port: vars.parsed("PORT", 3004)?,
            database,
            event_bus,
            intake,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn required_parsed<T>(&self, name: &'static str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        parse(name, self.required(name)?)
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(name) {
            Some(value) => parse(name, value),
            None => Ok(default),
        }
    }

    fn positive(&self, name: &'static str, default: i64) -> Result<i64, ConfigError> {
        let value = self.parsed(name, default)?;
        if value <= 0 {
            return Err(ConfigError::Invalid {
                name,
                value: value.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(value)
    }
}

fn parse<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}
