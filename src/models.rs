//! Records written and read by the monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification of a vendor email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    /// Household / primary-location confirmation containing a verification link.
    HouseholdUpdate,
    /// Temporary access code notification.
    TemporaryAccess,
    /// Anything else. Never persisted.
    Other,
}

impl EmailKind {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EmailKind::HouseholdUpdate => "household_update",
            EmailKind::TemporaryAccess => "temporary_access",
            EmailKind::Other => "other",
        }
    }
}

impl fmt::Display for EmailKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "household_update" => Ok(EmailKind::HouseholdUpdate),
            "temporary_access" => Ok(EmailKind::TemporaryAccess),
            "other" => Ok(EmailKind::Other),
            other => Err(other.to_string()),
        }
    }
}

/// Processing status of an email log record, fixed when the record is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Detected, no click attempted.
    Detected,
    /// Verification link clicked successfully.
    Clicked,
    /// Verification link click failed.
    Error,
}

impl RecordStatus {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Detected => "detected",
            RecordStatus::Clicked => "clicked",
            RecordStatus::Error => "error",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detected" => Ok(RecordStatus::Detected),
            "clicked" => Ok(RecordStatus::Clicked),
            "error" => Ok(RecordStatus::Error),
            other => Err(other.to_string()),
        }
    }
}

/// One processed vendor email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailLogRecord {
    pub id: String,
    pub account_id: String,
    pub account_name: String,
    /// `Message-ID` header, when the message carried one.
    pub message_id: Option<String>,
    pub subject: String,
    pub sender: String,
    pub recipient: String,
    pub kind: EmailKind,
    pub verification_link: Option<String>,
    pub access_code: Option<String>,
    pub device_info: Option<String>,
    pub status: RecordStatus,
    pub click_response: Option<String>,
    /// Leading slice of the decoded body.
    pub body_preview: String,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

/// Identity used to decide whether a message was already recorded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Account plus `Message-ID`.
    MessageId {
        account_id: String,
        message_id: String,
    },
    /// Account plus subject and sender, for messages without a usable `Message-ID`.
    Composite {
        account_id: String,
        subject: String,
        sender: String,
    },
}

impl DedupKey {
    /// Picks the message identifier when present and non-empty, else the composite.
    #[must_use]
    pub fn new(account_id: &str, message_id: Option<&str>, subject: &str, sender: &str) -> Self {
        match message_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => DedupKey::MessageId {
                account_id: account_id.to_string(),
                message_id: id.to_string(),
            },
            None => DedupKey::Composite {
                account_id: account_id.to_string(),
                subject: subject.to_string(),
                sender: sender.to_string(),
            },
        }
    }

    /// Key for an existing record.
    #[must_use]
    pub fn for_record(record: &EmailLogRecord) -> Self {
        Self::new(
            &record.account_id,
            record.message_id.as_deref(),
            &record.subject,
            &record.sender,
        )
    }
}

/// Severity of an activity log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(other.to_string()),
        }
    }
}

/// Append-only diagnostic line shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl ActivityEntry {
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

/// Filter for listing email log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    pub limit: usize,
    pub kind: Option<EmailKind>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            kind: None,
        }
    }
}

/// Process-lifetime counters. Reset only on restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub emails_processed: u64,
    pub links_clicked: u64,
    pub errors: u64,
    pub last_check: Option<DateTime<Utc>>,
}

/// Aggregate view for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub total_emails: usize,
    pub household_emails: usize,
    pub access_code_emails: usize,
    pub links_clicked: usize,
    pub errors: usize,
    pub active_accounts: usize,
    pub is_monitoring: bool,
    pub counters: RunCounters,
}

/// Totals computed by a log store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordTotals {
    pub total: usize,
    pub household: usize,
    pub temporary_access: usize,
    pub clicked: usize,
    pub errors: usize,
}

impl RecordTotals {
    /// Folds one record into the totals.
    pub fn add(&mut self, record: &EmailLogRecord) {
        self.total += 1;
        match record.kind {
            EmailKind::HouseholdUpdate => self.household += 1,
            EmailKind::TemporaryAccess => self.temporary_access += 1,
            EmailKind::Other => {}
        }
        match record.status {
            RecordStatus::Clicked => self.clicked += 1,
            RecordStatus::Error => self.errors += 1,
            RecordStatus::Detected => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_key_prefers_message_id() {
        let key = DedupKey::new("a", Some("<m1@x>"), "s", "f");
        assert_eq!(
            key,
            DedupKey::MessageId {
                account_id: "a".into(),
                message_id: "<m1@x>".into()
            }
        );
    }

    #[test]
    fn test_dedup_key_blank_message_id_falls_back() {
        let key = DedupKey::new("a", Some("  "), "s", "f");
        assert!(matches!(key, DedupKey::Composite { .. }));
        assert!(matches!(
            DedupKey::new("a", None, "s", "f"),
            DedupKey::Composite { .. }
        ));
    }

    #[test]
    fn test_enum_string_forms() {
        for kind in [
            EmailKind::HouseholdUpdate,
            EmailKind::TemporaryAccess,
            EmailKind::Other,
        ] {
            assert_eq!(kind.as_str().parse::<EmailKind>(), Ok(kind));
        }
        assert_eq!("clicked".parse::<RecordStatus>(), Ok(RecordStatus::Clicked));
        assert!("CLICKED".parse::<RecordStatus>().is_err());
        assert_eq!(LogLevel::Warning.to_string(), "WARNING");
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&EmailKind::TemporaryAccess).unwrap();
        assert_eq!(json, "\"temporary_access\"");
        let json = serde_json::to_string(&LogLevel::Error).unwrap();
        assert_eq!(json, "\"ERROR\"");
    }
}
