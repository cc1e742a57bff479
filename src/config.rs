//! Accounts and monitoring configuration.
//!
//! Use [`AccountBuilder`] to create an account with sensible defaults:
//!
//! ```
//! use household_watch::Account;
//!
//! let account = Account::builder()
//!     .email("user@example.com")
//!     .password("app-password")
//!     .build()
//!     .expect("valid account");
//!
//! assert_eq!(account.imap_host, "imap.gmail.com");
//! assert!(account.active);
//! ```

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// IMAP host used when an account does not name one.
pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";

/// IMAPS port.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Sender search variants, unioned per scan.
pub const DEFAULT_SENDER_PATTERNS: &[&str] = &[
    "info@account.netflix.com",
    "account.netflix.com",
    "mailer.netflix.com",
    "netflix.com",
];

/// A monitored mailbox.
///
/// Create using [`Account::builder()`].
///
/// Note: The `password` field is stored as a [`SecretString`] to prevent
/// accidental logging of credentials.
#[derive(Clone)]
pub struct Account {
    /// Stable identifier.
    pub id: String,
    /// Display name shown alongside log records.
    pub name: String,
    email: EmailAddress,
    password: SecretString,
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port (default: 993 for IMAPS).
    pub imap_port: u16,
    /// Inactive accounts are skipped by the scheduler.
    pub active: bool,
    /// Overrides [`MonitoringConfig::auto_click`] for this account when set.
    pub auto_click: Option<bool>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email.as_str())
            .field("password", &"[REDACTED]")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("active", &self.active)
            .field("auto_click", &self.auto_click)
            .finish_non_exhaustive()
    }
}

impl Account {
    /// Creates a new account builder.
    #[must_use]
    pub fn builder() -> AccountBuilder {
        AccountBuilder::default()
    }

    /// Returns the email address as a string slice.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Returns the password for IMAP login.
    ///
    /// The password is intentionally not a public field to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.imap_host, self.imap_port)
    }

    /// Whether link clicks are enabled for this account under `config`.
    #[must_use]
    pub fn auto_click_enabled(&self, config: &MonitoringConfig) -> bool {
        self.auto_click.unwrap_or(config.auto_click)
    }

    /// Returns a builder pre-filled with this account, for edits.
    #[must_use]
    pub fn to_builder(&self) -> AccountBuilder {
        AccountBuilder {
            id: Some(self.id.clone()),
            name: Some(self.name.clone()),
            email: Some(self.email.as_str().to_string()),
            password: Some(self.password.expose_secret().to_string()),
            imap_host: Some(self.imap_host.clone()),
            imap_port: Some(self.imap_port),
            active: Some(self.active),
            auto_click: self.auto_click,
            created_at: Some(self.created_at),
        }
    }
}

/// Validates an email address format.
fn validate_email(email: &str) -> Result<EmailAddress> {
    EmailAddress::parse_with_options(email, email_address::Options::default()).map_err(|_| {
        Error::InvalidEmailFormat {
            email: email.to_string(),
        }
    })
}

/// Builder for [`Account`].
#[derive(Debug, Default)]
pub struct AccountBuilder {
    id: Option<String>,
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    active: Option<bool>,
    auto_click: Option<bool>,
    created_at: Option<DateTime<Utc>>,
}

impl AccountBuilder {
    /// Sets the identifier. A random UUID is generated when unset.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the display name. Defaults to the email address.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the email address (required).
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the password (required).
    ///
    /// For Gmail/Outlook, use an app-specific password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the IMAP server hostname.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port.
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Marks the account active or inactive.
    #[must_use]
    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    /// Overrides the global auto-click flag for this account.
    #[must_use]
    pub fn auto_click(mut self, auto_click: bool) -> Self {
        self.auto_click = Some(auto_click);
        self
    }

    /// Sets the creation timestamp (used when loading from storage).
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the account.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn build(self) -> Result<Account> {
        let email_raw = self.email.ok_or_else(|| Error::InvalidConfig {
            message: "email is required".into(),
        })?;
        let email = validate_email(&email_raw)?;

        let password_raw = self.password.ok_or_else(|| Error::InvalidConfig {
            message: "password is required".into(),
        })?;

        let imap_host = self
            .imap_host
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string());

        let imap_port = self.imap_port.unwrap_or(DEFAULT_IMAP_PORT);
        if imap_port == 0 {
            return Err(Error::InvalidConfig {
                message: "imap port must be non-zero".into(),
            });
        }

        Ok(Account {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name.unwrap_or_else(|| email.as_str().to_string()),
            email,
            password: SecretString::from(password_raw),
            imap_host,
            imap_port,
            active: self.active.unwrap_or(true),
            auto_click: self.auto_click,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Timeout configuration for network operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for each sender search.
    pub search: Duration,
    /// Timeout for fetching message content.
    pub fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
    /// Total timeout for a verification link click, redirects included.
    pub click: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
            click: Duration::from_secs(30),
        }
    }
}

/// Singleton monitoring configuration, reloaded at the start of every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringConfig {
    /// Sleep between cycles.
    pub polling_interval: Duration,
    /// Click household verification links automatically.
    pub auto_click: bool,
    /// `FROM` search terms; result sets are unioned.
    pub sender_patterns: Vec<String>,
    /// Only the most recent `max_messages` matches are fetched per scan.
    pub max_messages: usize,
    /// Retry delay while no account is active.
    pub idle_backoff: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(60),
            auto_click: true,
            sender_patterns: DEFAULT_SENDER_PATTERNS
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            max_messages: 10,
            idle_backoff: Duration::from_secs(10),
        }
    }
}

impl MonitoringConfig {
    /// Checks the invariants the scheduler relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero interval or backoff, an empty sender
    /// list, a pattern containing control characters, or a zero message bound.
    pub fn validate(&self) -> Result<()> {
        if self.polling_interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "polling interval must be positive".into(),
            });
        }
        if self.idle_backoff.is_zero() {
            return Err(Error::InvalidConfig {
                message: "idle backoff must be positive".into(),
            });
        }
        if self.sender_patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::InvalidConfig {
                message: "at least one sender pattern is required".into(),
            });
        }
        // Patterns are spliced into IMAP commands and stored newline-separated
        if let Some(bad) = self
            .sender_patterns
            .iter()
            .find(|p| p.chars().any(char::is_control))
        {
            return Err(Error::InvalidConfig {
                message: format!("sender pattern {bad:?} contains control characters"),
            });
        }
        if self.max_messages == 0 {
            return Err(Error::InvalidConfig {
                message: "max_messages must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Process-level settings for the `household-watch` binary, read from the environment.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// SQLite database path.
    pub database_path: PathBuf,
    /// Account to register at startup, if credentials are present.
    pub seed_account: Option<Account>,
    /// Monitoring values given in the environment, applied over the stored configuration.
    pub monitoring: MonitoringOverrides,
}

/// Monitoring values set explicitly at startup. Unset fields keep the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoringOverrides {
    /// `HOUSEHOLD_WATCH_POLL_SECS`
    pub polling_interval: Option<Duration>,
    /// `HOUSEHOLD_WATCH_AUTO_CLICK`
    pub auto_click: Option<bool>,
}

impl MonitoringOverrides {
    /// Returns `true` if no variable was set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polling_interval.is_none() && self.auto_click.is_none()
    }

    /// Applies the set fields over `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the result fails [`MonitoringConfig::validate`].
    pub fn apply(&self, mut config: MonitoringConfig) -> Result<MonitoringConfig> {
        if let Some(interval) = self.polling_interval {
            config.polling_interval = interval;
        }
        if let Some(auto_click) = self.auto_click {
            config.auto_click = auto_click;
        }
        config.validate()?;
        Ok(config)
    }
}

impl ServiceSettings {
    /// Loads `.env` (if present) and reads `HOUSEHOLD_WATCH_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a value is present but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_path = lookup("HOUSEHOLD_WATCH_DB")
            .map_or_else(|| PathBuf::from("household-watch.db"), PathBuf::from);

        let seed_account = match (
            lookup("HOUSEHOLD_WATCH_EMAIL"),
            lookup("HOUSEHOLD_WATCH_PASSWORD"),
        ) {
            (Some(email), Some(password)) => {
                let mut builder = Account::builder()
                    .id("default")
                    .email(email)
                    .password(password);
                if let Some(host) = lookup("HOUSEHOLD_WATCH_IMAP_HOST") {
                    builder = builder.imap_host(host);
                }
                if let Some(port) = lookup("HOUSEHOLD_WATCH_IMAP_PORT") {
                    builder = builder.imap_port(parse_var("HOUSEHOLD_WATCH_IMAP_PORT", &port)?);
                }
                Some(builder.build()?)
            }
            _ => None,
        };

        let mut monitoring = MonitoringOverrides::default();
        if let Some(secs) = lookup("HOUSEHOLD_WATCH_POLL_SECS") {
            let secs: u64 = parse_var("HOUSEHOLD_WATCH_POLL_SECS", &secs)?;
            if secs == 0 {
                return Err(Error::InvalidConfig {
                    message: "HOUSEHOLD_WATCH_POLL_SECS must be positive".into(),
                });
            }
            monitoring.polling_interval = Some(Duration::from_secs(secs));
        }
        if let Some(flag) = lookup("HOUSEHOLD_WATCH_AUTO_CLICK") {
            monitoring.auto_click = Some(parse_bool("HOUSEHOLD_WATCH_AUTO_CLICK", &flag)?);
        }

        Ok(Self {
            database_path,
            seed_account,
            monitoring,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidConfig {
        message: format!("{key} has invalid value '{value}'"),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig {
            message: format!("{key} has invalid value '{value}'"),
        }),
    }
}
