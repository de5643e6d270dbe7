//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Follow-up delay used when a template has no `delay_days` set.
pub const DEFAULT_DELAY_DAYS: u32 = 3;

/// Scheduler / launch tuning.
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// Fallback follow-up interval in days.
    pub default_delay_days: u32,
    /// Upper bound on a single transport dispatch.
    pub send_timeout: Duration,
    /// Maximum contacts processed concurrently within one run.
    pub max_concurrent_sends: usize,
    /// Interval between periodic scheduler ticks.
    pub tick_interval: Duration,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            default_delay_days: DEFAULT_DELAY_DAYS,
            send_timeout: Duration::from_secs(30),
            max_concurrent_sends: 8,
            tick_interval: Duration::from_secs(3600), // hourly
        }
    }
}

impl SequenceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            default_delay_days: env_parse("OUTREACH_DEFAULT_DELAY_DAYS")?
                .unwrap_or(defaults.default_delay_days),
            send_timeout: env_parse("OUTREACH_SEND_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.send_timeout),
            max_concurrent_sends: env_parse::<usize>("OUTREACH_MAX_CONCURRENT_SENDS")?
                .unwrap_or(defaults.max_concurrent_sends)
                .max(1),
            tick_interval: env_parse("OUTREACH_TICK_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick_interval),
        })
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

/// HTTP mail bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: String,
}

/// Which mail transport the binary wires into the engine.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Smtp(SmtpConfig),
    Bridge(BridgeConfig),
}

impl TransportConfig {
    /// `OUTREACH_TRANSPORT` selects `smtp` (default) or `bridge`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let kind = std::env::var("OUTREACH_TRANSPORT").unwrap_or_else(|_| "smtp".to_string());
        match kind.to_ascii_lowercase().as_str() {
            "smtp" => {
                let host = require_env("SMTP_HOST")?;
                let port = env_parse("SMTP_PORT")?.unwrap_or(587);
                let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
                let password = SecretString::from(std::env::var("SMTP_PASSWORD").unwrap_or_default());
                let from_address =
                    std::env::var("SMTP_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
                Ok(Self::Smtp(SmtpConfig {
                    host,
                    port,
                    username,
                    password,
                    from_address,
                }))
            }
            "bridge" => Ok(Self::Bridge(BridgeConfig {
                url: require_env("MAIL_BRIDGE_URL")?,
            })),
            other => Err(ConfigError::InvalidValue {
                key: "OUTREACH_TRANSPORT".into(),
                message: format!("expected `smtp` or `bridge`, got `{other}`"),
            }),
        }
    }
}

/// IMAP settings for the reply poller.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub poll_interval: Duration,
}

impl ImapConfig {
    /// Returns `None` if `IMAP_HOST` is not set (poller disabled).
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("IMAP_HOST").ok()?;

        let port: u16 = std::env::var("IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("IMAP_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("IMAP_PASSWORD").unwrap_or_default());

        let poll_interval_secs: u64 = std::env::var("IMAP_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Some(Self {
            host,
            port,
            username,
            password,
            poll_interval: Duration::from_secs(poll_interval_secs),
        })
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub http_port: u16,
    /// Recipient for `POST /test-email`.
    pub test_recipient: Option<String>,
    pub sequence: SequenceConfig,
    pub transport: TransportConfig,
    pub imap: Option<ImapConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("OUTREACH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/outreach.db"));

        Ok(Self {
            db_path,
            http_port: env_parse("OUTREACH_HTTP_PORT")?.unwrap_or(5000),
            test_recipient: std::env::var("OUTREACH_TEST_RECIPIENT").ok(),
            sequence: SequenceConfig::from_env()?,
            transport: TransportConfig::from_env()?,
            imap: ImapConfig::from_env(),
        })
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an optional environment variable; unset is `Ok(None)`, malformed is an error.
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_defaults() {
        let cfg = SequenceConfig::default();
        assert_eq!(cfg.default_delay_days, 3);
        assert_eq!(cfg.tick_interval, Duration::from_secs(3600));
        assert!(cfg.max_concurrent_sends >= 1);
    }

    #[test]
    fn env_parse_unset_is_none() {
        let parsed: Option<u16> = env_parse("OUTREACH_TEST_SURELY_UNSET_VAR").unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn env_parse_rejects_garbage() {
        // SAFETY: variable name is unique to this test; nothing else reads it.
        unsafe { std::env::set_var("OUTREACH_TEST_GARBAGE_PORT", "not-a-port") };
        let parsed: Result<Option<u16>, _> = env_parse("OUTREACH_TEST_GARBAGE_PORT");
        assert!(matches!(parsed, Err(ConfigError::InvalidValue { .. })));
        unsafe { std::env::remove_var("OUTREACH_TEST_GARBAGE_PORT") };
    }
}
