//! # household-watch
//!
//! Async IMAP monitor for streaming-service household notifications.
//!
//! This crate provides:
//! - Polling one or more IMAP mailboxes for vendor notifications (by sender)
//! - Classifying them as household updates or temporary access codes
//! - Extracting verification links, access codes, device info and recipient names
//! - Optionally following household verification links
//! - Deduplicated, append-only log records plus an operator activity log
//!
//! ## Features
//!
//! - **`integration-tests`**: Marks the live-IMAP tests in `tests/integration.rs`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use household_watch::{Account, Monitor, SqliteStore, TimeoutConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> household_watch::Result<()> {
//! let store = Arc::new(SqliteStore::open("household-watch.db")?);
//! let monitor = Monitor::with_network(store, TimeoutConfig::default())?;
//!
//! monitor
//!     .save_account(
//!         Account::builder()
//!             .name("Living room")
//!             .email("user@gmail.com")
//!             .password("app-password") // Use app-specific password for Gmail
//!             .build()?,
//!     )
//!     .await?;
//!
//! // Scan once, outside the schedule
//! let summary = monitor.check_now().await?;
//! println!("{} new records", summary.messages.recorded);
//!
//! // Or poll in the background
//! monitor.start().await?;
//! # monitor.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Classification
//!
//! Classification is a pure function of subject and body:
//!
//! ```
//! use household_watch::classifier::classify;
//! use household_watch::EmailKind;
//!
//! let body = r#"<a href="https://www.netflix.com/account/update-primary-location?nftoken=abc">Yes, this was me</a>"#;
//! let result = classify("Your Netflix household", body);
//! assert_eq!(result.kind, EmailKind::HouseholdUpdate);
//! assert_eq!(
//!     result.verification_link.as_deref(),
//!     Some("https://www.netflix.com/account/update-primary-location?nftoken=abc")
//! );
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::is_retryable`]
//! to determine if an operation can be retried:
//!
//! ```
//! use household_watch::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, next poll will retry: {}", error);
//!     } else {
//!         println!("Permanent error ({}): {}", error.category(), error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. Major operations emit spans with
//! structured fields.
//!
//! ### Span Naming Convention
//!
//! - `Monitor::start` / `Monitor::stop` / `Monitor::check_now` - Scheduler control
//! - `Monitor::test_connection` - Connection test
//! - `Scanner::scan_account` - One account's pipeline pass
//! - `ImapMailSource::fetch_messages` - IMAP search and fetch
//! - `HttpLinkClicker::click` - Verification link request
//! - `session::open` - IMAP authentication and mailbox selection
//! - `connection::establish_tls` - TLS connection
//!
//! ### Standard Fields
//!
//! - `account` - Account display name
//! - `imap_host` - IMAP server hostname
//! - `uid` - Message UID
//! - `kind` - Classified email kind

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod actuator;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod error;
pub mod fetcher;
pub mod matcher;
pub mod models;
pub mod monitor;
pub mod scanner;
pub mod store;

// Internal modules
mod connection;
mod session;

// Re-exports for ergonomic API
pub use actuator::{ClickOutcome, HttpLinkClicker, LinkClicker};
pub use config::{
    Account, AccountBuilder, MonitoringConfig, MonitoringOverrides, ServiceSettings, TimeoutConfig,
};
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use fetcher::{ImapMailSource, MailSource, RawMessage};
pub use models::{
    ActivityEntry, DedupKey, EmailKind, EmailLogRecord, LogLevel, LogQuery, MonitorStats,
    RecordStatus, RecordTotals, RunCounters,
};
pub use monitor::{CycleSummary, Monitor, Phase};
pub use scanner::ScanReport;
pub use store::{AccountStore, ActivityLog, LogStore, MemoryStore, SqliteStore, Store};
