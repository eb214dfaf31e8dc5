//! Engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `WINBACK_DATABASE_URL` - `PostgreSQL` connection string
//! - `WINBACK_BASE_URL` - Public URL recovery links point at
//! - `WINBACK_RECOVERY_SECRET` - Recovery token signing secret (min 32 chars, high entropy)
//! - `SMTP_HOST` - SMTP relay host
//! - `SMTP_USERNAME` - SMTP username
//! - `SMTP_PASSWORD` - SMTP password
//! - `SMTP_FROM_ADDRESS` - From address for reminder emails
//! - `CONSENT_API_URL` - Identity service base URL
//! - `CONSENT_API_KEY` - Identity service API key
//! - `CATALOG_API_URL` - Product catalog base URL
//! - `CATALOG_API_KEY` - Product catalog API key
//!
//! ## Optional
//! - `WINBACK_HOST` - Bind address (default: 127.0.0.1)
//! - `WINBACK_PORT` - Listen port (default: 4000)
//! - `WINBACK_STALE_AFTER_MINUTES` - Active -> stale boundary (default: 30)
//! - `WINBACK_ABANDONED_AFTER_MINUTES` - Stale -> abandoned boundary (default: 60)
//! - `WINBACK_REMINDER_SCHEDULE_MINUTES` - Ascending tier thresholds, comma-separated (default: 60,1440)
//! - `WINBACK_MAX_REMINDERS` - Per-cart reminder cap across all tiers (default: 2)
//! - `WINBACK_SCHEDULER_INTERVAL_SECONDS` - Seconds between reminder passes (default: 3600)
//! - `WINBACK_DISPATCH_TIMEOUT_SECONDS` - Per-send confirmation deadline (default: 30)
//! - `WINBACK_DISPATCH_CONCURRENCY` - Carts processed in parallel per pass (default: 8)
//! - `WINBACK_RECOVERY_TOKEN_TTL_HOURS` - Recovery link validity (default: 72)
//! - `SMTP_PORT` - SMTP relay port (default: 587)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use chrono::TimeDelta;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::lifecycle::{LifecycleThresholds, ThresholdError};
use crate::services::scheduler::{ReminderSchedule, ScheduleError};

const MIN_RECOVERY_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
    #[error("Invalid lifecycle thresholds: {0}")]
    InvalidThresholds(#[from] ThresholdError),
    #[error("Invalid reminder schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),
}

/// Engine application configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL recovery links point at
    pub base_url: String,
    /// Recovery token signing secret
    pub recovery_secret: SecretString,
    /// How long a recovery link stays valid
    pub recovery_token_ttl: TimeDelta,
    /// Lifecycle classification boundaries
    pub thresholds: LifecycleThresholds,
    /// Reminder tier ladder and per-cart cap
    pub schedule: ReminderSchedule,
    /// Time between reminder passes
    pub scheduler_interval: Duration,
    /// Per-send confirmation deadline
    pub dispatch_timeout: Duration,
    /// Carts processed in parallel per pass
    pub dispatch_concurrency: usize,
    /// SMTP delivery configuration
    pub smtp: SmtpConfig,
    /// Identity service (consent + recipient)
    pub consent: CollaboratorConfig,
    /// Product catalog (current prices)
    pub catalog: CollaboratorConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// SMTP delivery configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct SmtpConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: SecretString,
    pub from_address: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Connection details for a read-only collaborator API.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct CollaboratorConfig {
    pub base_url: String,
    pub api_key: SecretString,
}

impl std::fmt::Debug for CollaboratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaboratorConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid,
    /// if secrets fail validation (placeholder detection, entropy check), or
    /// if the lifecycle thresholds or reminder schedule are inconsistent.
    /// Misconfiguration fails startup; it is never deferred to runtime.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("WINBACK_DATABASE_URL")?;
        let host = get_env_or_default("WINBACK_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("WINBACK_HOST".to_string(), e.to_string()))?;
        let port = parse_env_or_default::<u16>("WINBACK_PORT", "4000")?;
        let base_url = get_required_env("WINBACK_BASE_URL")?;
        url::Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("WINBACK_BASE_URL".to_string(), e.to_string())
        })?;

        let recovery_secret = get_validated_secret("WINBACK_RECOVERY_SECRET")?;
        validate_recovery_secret(&recovery_secret, "WINBACK_RECOVERY_SECRET")?;
        let recovery_token_ttl = TimeDelta::hours(parse_env_or_default::<i64>(
            "WINBACK_RECOVERY_TOKEN_TTL_HOURS",
            "72",
        )?);

        let stale_after =
            TimeDelta::minutes(parse_env_or_default::<i64>("WINBACK_STALE_AFTER_MINUTES", "30")?);
        let abandoned_after = TimeDelta::minutes(parse_env_or_default::<i64>(
            "WINBACK_ABANDONED_AFTER_MINUTES",
            "60",
        )?);
        let thresholds = LifecycleThresholds::new(stale_after, abandoned_after)?;

        let schedule_minutes =
            parse_schedule(&get_env_or_default("WINBACK_REMINDER_SCHEDULE_MINUTES", "60,1440"))?;
        let max_reminders = parse_env_or_default::<u32>("WINBACK_MAX_REMINDERS", "2")?;
        let schedule = ReminderSchedule::new(schedule_minutes, max_reminders)?;

        let scheduler_interval = Duration::from_secs(parse_env_or_default::<u64>(
            "WINBACK_SCHEDULER_INTERVAL_SECONDS",
            "3600",
        )?);
        let dispatch_timeout = Duration::from_secs(parse_env_or_default::<u64>(
            "WINBACK_DISPATCH_TIMEOUT_SECONDS",
            "30",
        )?);
        let dispatch_concurrency =
            parse_env_or_default::<usize>("WINBACK_DISPATCH_CONCURRENCY", "8")?;

        let smtp = SmtpConfig::from_env()?;
        let consent = CollaboratorConfig::from_env("CONSENT_API_URL", "CONSENT_API_KEY")?;
        let catalog = CollaboratorConfig::from_env("CATALOG_API_URL", "CATALOG_API_KEY")?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            recovery_secret,
            recovery_token_ttl,
            thresholds,
            schedule,
            scheduler_interval,
            dispatch_timeout,
            dispatch_concurrency,
            smtp,
            consent,
            catalog,
            sentry_dsn,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl SmtpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            smtp_host: get_required_env("SMTP_HOST")?,
            smtp_port: parse_env_or_default::<u16>("SMTP_PORT", "587")?,
            smtp_username: get_required_env("SMTP_USERNAME")?,
            smtp_password: get_required_secret("SMTP_PASSWORD")?,
            from_address: get_required_env("SMTP_FROM_ADDRESS")?,
        })
    }
}

impl CollaboratorConfig {
    fn from_env(url_key: &str, api_key_key: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: get_required_env(url_key)?,
            api_key: get_required_secret(api_key_key)?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable parsed to `T`, with a default.
fn parse_env_or_default<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a comma-separated list of minutes into tier thresholds. An empty
/// string means no tiers (only valid alongside a zero reminder cap).
fn parse_schedule(raw: &str) -> Result<Vec<TimeDelta>, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<i64>()
                .map(TimeDelta::minutes)
                .map_err(|e| {
                    ConfigError::InvalidEnvVar(
                        "WINBACK_REMINDER_SCHEDULE_MINUTES".to_string(),
                        format!("bad entry {part:?}: {e}"),
                    )
                })
        })
        .collect()
}

/// Validate that the recovery secret meets minimum length requirements.
fn validate_recovery_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_RECOVERY_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_RECOVERY_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    // Check blocklist
    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // Check entropy (real secrets like API keys have high entropy)
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_secrets_are_rejected() {
        for secret in ["changeme-please-1234567890-abcdef", "your-signing-key-goes-here-123456"] {
            let err = validate_secret_strength(secret, "TEST_SECRET").unwrap_err();
            assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
        }
    }

    #[test]
    fn low_entropy_secrets_are_rejected() {
        let err = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_SECRET")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn random_looking_secrets_pass() {
        validate_secret_strength("k9#mP2$vL8@qR5!wX3^zA7&bN4*cD6(e", "TEST_SECRET").unwrap();
    }

    #[test]
    fn schedule_parses_comma_separated_minutes() {
        let parsed = parse_schedule("60, 1440").unwrap();
        assert_eq!(parsed, vec![TimeDelta::minutes(60), TimeDelta::minutes(1440)]);

        assert!(parse_schedule("").unwrap().is_empty());
        assert!(parse_schedule("60,abc").is_err());
    }

    #[test]
    fn entropy_of_uniform_string_is_zero() {
        assert!(shannon_entropy("aaaa") < f64::EPSILON);
        assert!(shannon_entropy("") < f64::EPSILON);
    }
}
