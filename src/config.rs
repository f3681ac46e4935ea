//! Configuration module for feedmail.

use serde::Deserialize;
use std::path::Path;

use crate::datetime::parse_timezone;
use crate::feed::Subscriber;
use crate::{FeedmailError, Result};

/// Environment variable that overrides `mail_sender.password`.
pub const SMTP_PASSWORD_ENV: &str = "FEEDMAIL_SMTP_PASSWORD";

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string; the scheme selects the backend (e.g. `sqlite:data/feedmail.db`).
    #[serde(default = "default_dsn")]
    pub dsn: String,
}

fn default_dsn() -> String {
    "sqlite:data/feedmail.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { dsn: default_dsn() }
    }
}

/// Outgoing mail configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailSenderConfig {
    /// SMTP server as `host:port`.
    #[serde(default)]
    pub smtp_server: String,
    /// Sender address, also used as the SMTP user name.
    #[serde(default)]
    pub sender_addr: String,
    /// SMTP password.
    #[serde(default)]
    pub password: String,
}

impl MailSenderConfig {
    /// Split `smtp_server` into host and port.
    pub fn host_port(&self) -> Result<(String, u16)> {
        let (host, port) = self.smtp_server.rsplit_once(':').ok_or_else(|| {
            FeedmailError::invalid_argument(format!(
                "invalid smtp server {:?}: expected host:port",
                self.smtp_server
            ))
        })?;
        if host.is_empty() {
            return Err(FeedmailError::invalid_argument(format!(
                "invalid smtp server {:?}: missing host",
                self.smtp_server
            )));
        }
        let port = port.parse::<u16>().map_err(|e| {
            FeedmailError::invalid_argument_with(
                format!("invalid smtp server {:?}: bad port", self.smtp_server),
                e,
            )
        })?;
        Ok((host.to_string(), port))
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Timezone in which cron expressions are evaluated.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

/// Feed fetching configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum number of redirects.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Maximum feed size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_max_feed_size() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_user_agent() -> String {
    concat!("feedmail/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_redirects: default_max_redirects(),
            max_feed_size_bytes: default_max_feed_size(),
            user_agent: default_user_agent(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file, written in addition to stdout.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Outgoing mail configuration.
    #[serde(default)]
    pub mail_sender: MailSenderConfig,
    /// Scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Feed fetching configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Subscribers and their sites.
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FeedmailError::invalid_argument_with(format!("open {} failed", path.display()), e)
        })?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| FeedmailError::invalid_argument_with("invalid config file", e))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `FEEDMAIL_SMTP_PASSWORD`: Override the SMTP password
    pub fn apply_env_overrides(&mut self) {
        if let Ok(password) = std::env::var(SMTP_PASSWORD_ENV) {
            if !password.is_empty() {
                self.mail_sender.password = password;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Cron expressions and site URLs are checked later, when each
    /// subscriber's job is built and scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.subscribers.is_empty() {
            return Err(FeedmailError::invalid_argument("no subscribers configured"));
        }
        self.mail_sender.host_port()?;
        if self.mail_sender.sender_addr.is_empty() || self.mail_sender.password.is_empty() {
            return Err(FeedmailError::invalid_argument(
                "invalid sender mail config: sender_addr and password are required",
            ));
        }
        parse_timezone(&self.scheduler.timezone)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const SAMPLE: &str = r#"
[database]
dsn = "sqlite:///tmp/feedmail.db"

[mail_sender]
smtp_server = "smtp.example.com:587"
sender_addr = "bot@example.com"
password = "secret"

[scheduler]
timezone = "Asia/Tokyo"

[[subscribers]]
name = "alice"
email = "a@example.com"
schedule = "*/30 * * * *"

[[subscribers.sites]]
name = "foo"
url = "https://foo.com/index.rss"

[[subscribers.sites]]
name = "bar"
url = "https://bar.com/atom.xml"
urls = ["https://mirror.bar.com/atom.xml"]
"#;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.database.dsn, "sqlite:data/feedmail.db");
        assert_eq!(config.scheduler.timezone, "UTC");
        assert_eq!(config.fetch.connect_timeout_secs, 10);
        assert_eq!(config.fetch.read_timeout_secs, 20);
        assert_eq!(config.fetch.total_timeout_secs, 30);
        assert_eq!(config.fetch.max_redirects, 5);
        assert_eq!(config.fetch.max_feed_size_bytes, 5 * 1024 * 1024);
        assert!(config.fetch.user_agent.starts_with("feedmail/"));
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
        assert!(config.subscribers.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();

        assert_eq!(config.database.dsn, "sqlite:///tmp/feedmail.db");
        assert_eq!(config.mail_sender.sender_addr, "bot@example.com");
        assert_eq!(config.scheduler.timezone, "Asia/Tokyo");
        assert_eq!(config.subscribers.len(), 1);

        let alice = &config.subscribers[0];
        assert_eq!(alice.name, "alice");
        assert_eq!(alice.email, "a@example.com");
        assert_eq!(alice.schedule, "*/30 * * * *");
        assert_eq!(alice.sites.len(), 2);
        assert!(alice.sites[0].urls.is_empty());
        assert_eq!(alice.sites[1].urls, vec!["https://mirror.bar.com/atom.xml"]);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = Config::parse("this is = = not toml").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_host_port() {
        let sender = MailSenderConfig {
            smtp_server: "smtp.example.com:465".to_string(),
            ..Default::default()
        };
        assert_eq!(
            sender.host_port().unwrap(),
            ("smtp.example.com".to_string(), 465)
        );

        for bad in ["smtp.example.com", ":25", "smtp.example.com:port", ""] {
            let sender = MailSenderConfig {
                smtp_server: bad.to_string(),
                ..Default::default()
            };
            assert_eq!(
                sender.host_port().unwrap_err().code(),
                ErrorCode::InvalidArgument,
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_requires_subscribers() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.subscribers.clear();
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("no subscribers"));
    }

    #[test]
    fn test_validate_requires_sender_credentials() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.mail_sender.password.clear();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("invalid sender mail config"));
    }

    #[test]
    fn test_validate_rejects_bad_timezone() {
        let mut config = Config::parse(SAMPLE).unwrap();
        config.scheduler.timezone = "Mars/Olympus".to_string();
        assert_eq!(
            config.validate().unwrap_err().code(),
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.subscribers[0].name, "alice");

        let missing = Config::load(dir.path().join("missing.toml")).unwrap_err();
        assert_eq!(missing.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(include_str!("../config.example.toml")).unwrap();
        assert_eq!(config.subscribers.len(), 1);
        assert_eq!(config.subscribers[0].sites.len(), 2);
        assert_eq!(config.subscribers[0].sites[1].urls.len(), 1);
        assert_eq!(config.mail_sender.host_port().unwrap().1, 465);
    }
}
