//! Configuration management following 12-factor app principles
//!
//! All configuration is loaded from environment variables to ensure
//! clean separation between code and config.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection URL (PostgreSQL)
    pub database_url: String,

    /// Public origin of this service, used to build machine callback URLs
    pub api_url: String,

    /// Where terminal-run notifications are delivered, if anywhere
    pub webhook_notification_url: Option<String>,
    pub webhook_authorization_header: Option<String>,

    /// Background services started at boot
    pub auto_start_worker: bool,
    pub auto_start_sweeper: bool,

    /// Runtime configuration
    pub rust_log: String,
    pub log_format: String,
    pub port: u16,
}

impl std::fmt::Debug for Config {
    #[mutants::skip] // Redacting formatter, only read by humans
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("webhook_notification_url", &self.webhook_notification_url)
            .field(
                "webhook_authorization_header",
                &self.webhook_authorization_header.as_ref().map(|_| "[REDACTED]"),
            )
            .field("auto_start_worker", &self.auto_start_worker)
            .field("auto_start_sweeper", &self.auto_start_sweeper)
            .field("rust_log", &self.rust_log)
            .field("log_format", &self.log_format)
            .field("port", &self.port)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let config = Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?,

            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),

            webhook_notification_url: non_empty_var("WEBHOOK_NOTIFICATION_URL"),
            webhook_authorization_header: non_empty_var("WEBHOOK_AUTHORIZATION_HEADER"),

            auto_start_worker: parse_var("AUTO_START_WORKER", false),
            auto_start_sweeper: parse_var("AUTO_START_SWEEPER", false),

            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "runfleet=debug".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            port: parse_var("PORT", 3000),
        };

        Ok(config)
    }
}

/// Read an environment variable, treating blank values as unset.
pub fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable, falling back to `default` when it is
/// missing or malformed. Malformed values are logged.
pub fn parse_var<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, ?default, "Ignoring malformed environment value");
                default
            }
        },
        Err(_) => default,
    }
}
