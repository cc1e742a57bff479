//! One account's pass through the pipeline: fetch, decode, classify, dedup, click, persist.

use crate::actuator::LinkClicker;
use crate::classifier::{self, Classification};
use crate::config::{Account, MonitoringConfig};
use crate::decoder::{self, DecodedEmail};
use crate::error::Result;
use crate::fetcher::{MailSource, RawMessage};
use crate::models::{
    ActivityEntry, DedupKey, EmailKind, EmailLogRecord, LogLevel, RecordStatus, RunCounters,
};
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Characters of the body kept on a log record.
pub const BODY_PREVIEW_CHARS: usize = 2000;

/// What happened to the messages of one account scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Messages returned by the mail source.
    pub fetched: usize,
    /// Records written.
    pub recorded: usize,
    /// Messages already present in the log store.
    pub duplicates: usize,
    /// Messages classified as neither kind.
    pub irrelevant: usize,
    /// Messages that could not be decoded or stored.
    pub failed: usize,
    /// Links followed successfully.
    pub clicked: usize,
    /// Link clicks that failed.
    pub click_failures: usize,
}

impl ScanReport {
    /// Folds this report into process-lifetime counters.
    pub fn apply_to(&self, counters: &mut RunCounters) {
        counters.emails_processed += self.recorded as u64;
        counters.links_clicked += self.clicked as u64;
        counters.errors += (self.failed + self.click_failures) as u64;
    }
}

enum MessageOutcome {
    Irrelevant,
    Duplicate,
    Recorded(RecordStatus),
}

/// Runs the per-account pipeline against the injected collaborators.
#[derive(Clone)]
pub struct Scanner {
    store: Arc<dyn Store>,
    source: Arc<dyn MailSource>,
    clicker: Arc<dyn LinkClicker>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner").finish_non_exhaustive()
    }
}

impl Scanner {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn MailSource>,
        clicker: Arc<dyn LinkClicker>,
    ) -> Self {
        Self {
            store,
            source,
            clicker,
        }
    }

    /// Scans one account.
    ///
    /// # Errors
    ///
    /// Returns the mail source's error if the mailbox could not be read. Failures of
    /// individual messages are logged and counted in the report instead.
    #[instrument(name = "Scanner::scan_account", skip_all, fields(account = %account.name))]
    pub async fn scan_account(
        &self,
        account: &Account,
        config: &MonitoringConfig,
    ) -> Result<ScanReport> {
        let messages = self.source.fetch_messages(account, config).await?;
        let mut report = ScanReport {
            fetched: messages.len(),
            ..ScanReport::default()
        };

        for raw in &messages {
            match self.process_message(account, config, raw).await {
                Ok(MessageOutcome::Irrelevant) => report.irrelevant += 1,
                Ok(MessageOutcome::Duplicate) => report.duplicates += 1,
                Ok(MessageOutcome::Recorded(status)) => {
                    report.recorded += 1;
                    match status {
                        RecordStatus::Clicked => report.clicked += 1,
                        RecordStatus::Error => report.click_failures += 1,
                        RecordStatus::Detected => {}
                    }
                }
                Err(e) => {
                    warn!(uid = raw.uid, error = %e, "Skipping message");
                    report.failed += 1;
                    self.note(
                        LogLevel::Error,
                        format!("Error processing message {} for {}: {e}", raw.uid, account.name),
                    )
                    .await;
                }
            }
        }

        debug!(?report, "Account scan finished");
        Ok(report)
    }

    async fn process_message(
        &self,
        account: &Account,
        config: &MonitoringConfig,
        raw: &RawMessage,
    ) -> Result<MessageOutcome> {
        let email = decoder::decode(raw)?;
        let classification = classifier::classify(&email.subject, &email.body);
        if !classification.is_relevant() {
            return Ok(MessageOutcome::Irrelevant);
        }

        let key = DedupKey::new(
            &account.id,
            email.message_id.as_deref(),
            &email.subject,
            &email.sender,
        );
        if self.store.find_record(&key).await?.is_some() {
            debug!(uid = raw.uid, "Already recorded");
            return Ok(MessageOutcome::Duplicate);
        }

        let mut record = build_record(account, &email, classification);
        info!(
            kind = %record.kind,
            subject = %record.subject,
            has_link = record.verification_link.is_some(),
            "Detected vendor email"
        );

        if record.kind == EmailKind::HouseholdUpdate && account.auto_click_enabled(config) {
            if let Some(link) = record.verification_link.clone() {
                let outcome = self.clicker.click(&link).await;
                record.status = if outcome.success {
                    RecordStatus::Clicked
                } else {
                    RecordStatus::Error
                };
                record.click_response = Some(outcome.note);
            }
        }

        let status = record.status;
        let summary = detection_message(account, &record);
        if !self.store.insert_record(record).await? {
            return Ok(MessageOutcome::Duplicate);
        }

        let level = if status == RecordStatus::Error {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };
        self.note(level, summary).await;
        Ok(MessageOutcome::Recorded(status))
    }

    async fn note(&self, level: LogLevel, message: String) {
        if let Err(e) = self.store.append(ActivityEntry::new(level, message)).await {
            warn!(error = %e, "Failed to write activity entry");
        }
    }
}

/// Builds the log record for a newly seen message, with status `detected`.
#[must_use]
pub fn build_record(
    account: &Account,
    email: &DecodedEmail,
    classification: Classification,
) -> EmailLogRecord {
    let now = Utc::now();
    EmailLogRecord {
        id: uuid::Uuid::new_v4().to_string(),
        account_id: account.id.clone(),
        account_name: account.name.clone(),
        message_id: email.message_id.clone(),
        subject: email.subject.clone(),
        sender: email.sender.clone(),
        recipient: classification.recipient,
        kind: classification.kind,
        verification_link: classification.verification_link,
        access_code: classification.access_code,
        device_info: classification.device_info,
        status: RecordStatus::Detected,
        click_response: None,
        body_preview: email.body.chars().take(BODY_PREVIEW_CHARS).collect(),
        received_at: email.date.unwrap_or(now),
        processed_at: now,
    }
}

fn detection_message(account: &Account, record: &EmailLogRecord) -> String {
    let mut message = match record.kind {
        EmailKind::TemporaryAccess => format!(
            "Temporary access code for {}: {}",
            account.name,
            record.access_code.as_deref().unwrap_or("not found")
        ),
        _ => format!("Household email detected for {}: {}", account.name, record.subject),
    };
    if let Some(note) = &record.click_response {
        message.push_str(&format!(" (link: {note})"));
    }
    message
}
