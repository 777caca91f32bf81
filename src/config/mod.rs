//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if a value does not parse.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use chrono_tz::Tz;
use secrets::SecretString;

#[derive(Debug)]
pub struct Config {
    /// Required only for the Postgres backend.
    pub database_url: Option<SecretString>,
    pub database_max_connections: u32,
    pub listen_addr: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub executor_timeout_ms: u64,
    pub delivery_timeout_ms: u64,
    pub export_timeout_ms: u64,
    pub scheduler_timezone: Tz,
    pub sources_dir: Option<PathBuf>,
    pub gap_default_threshold_ms: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let defaults = GatewaySettings::default();
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            database_max_connections: parsed_var("DATABASE_MAX_CONNECTIONS", 10)?,
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            executor_timeout_ms: parsed_var("EXECUTOR_TIMEOUT_MS", 30_000)?,
            delivery_timeout_ms: parsed_var("DELIVERY_TIMEOUT_MS", 10_000)?,
            export_timeout_ms: parsed_var("EXPORT_TIMEOUT_MS", 120_000)?,
            scheduler_timezone: parsed_var("SCHEDULER_TIMEZONE", defaults.default_timezone)?,
            sources_dir: std::env::var("SOURCES_DIR").ok().map(PathBuf::from),
            gap_default_threshold_ms: parsed_var("GAP_DEFAULT_THRESHOLD_MS", 3_600_000)?,
        })
    }

    /// The database URL, or a config error when running without one.
    pub fn require_database_url(&self) -> Result<&SecretString> {
        self.database_url
            .as_ref()
            .ok_or_else(|| Error::Config("required environment variable DATABASE_URL is not set".into()))
    }

    /// Runtime knobs handed to the gateway's services.
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            executor_timeout: Duration::from_millis(self.executor_timeout_ms),
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            export_timeout: Duration::from_millis(self.export_timeout_ms),
            default_timezone: self.scheduler_timezone,
            gap_default_threshold_ms: self.gap_default_threshold_ms,
        }
    }
}

/// Timeouts and defaults shared by the services.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    pub executor_timeout: Duration,
    pub delivery_timeout: Duration,
    /// Default and upper bound for export deadlines.
    pub export_timeout: Duration,
    /// Cron timezone for jobs that do not name one.
    pub default_timezone: Tz,
    pub gap_default_threshold_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            executor_timeout: Duration::from_secs(30),
            delivery_timeout: Duration::from_secs(10),
            export_timeout: Duration::from_secs(120),
            default_timezone: Tz::UTC,
            gap_default_threshold_ms: 3_600_000,
        }
    }
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
