//! Shared fakes for the pipeline and scheduler tests.

#![allow(dead_code)]

use async_trait::async_trait;
use household_watch::{
    Account, AccountStore, ActivityEntry, ActivityLog, ClickOutcome, DedupKey, EmailLogRecord,
    Error, LinkClicker, LogQuery, LogStore, MailSource, MemoryStore, Monitor, MonitoringConfig,
    RawMessage, RecordTotals, Result,
};
use std::sync::atomic::AtomicBool;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const HOUSEHOLD_LINK: &str =
    "https://www.netflix.com/account/update-primary-location?nftoken=abc";

/// In-memory mailboxes keyed by account id.
#[derive(Default)]
pub struct FakeMailSource {
    mailboxes: Mutex<HashMap<String, Vec<RawMessage>>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    panic_on_fetch: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeMailSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, account_id: &str, message: RawMessage) {
        self.mailboxes
            .lock()
            .unwrap()
            .entry(account_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn fail(&self, account_id: &str) {
        self.failing.lock().unwrap().insert(account_id.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Makes every later fetch panic, taking down whichever task runs it.
    pub fn panic_on_fetch(&self, enabled: bool) {
        self.panic_on_fetch.store(enabled, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailSource for FakeMailSource {
    async fn fetch_messages(
        &self,
        account: &Account,
        config: &MonitoringConfig,
    ) -> Result<Vec<RawMessage>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_fetch.load(Ordering::SeqCst) {
            panic!("mailbox for {} exploded", account.id);
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&account.id) {
            return Err(Error::TcpConnect {
                target: account.server_address(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        let messages = self
            .mailboxes
            .lock()
            .unwrap()
            .get(&account.id)
            .cloned()
            .unwrap_or_default();
        let skip = messages.len().saturating_sub(config.max_messages);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn test_connection(&self, account: &Account) -> Result<()> {
        if self.failing.lock().unwrap().contains(&account.id) {
            return Err(Error::TcpConnect {
                target: account.server_address(),
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }
        Ok(())
    }
}

/// Clicker that answers every link with a fixed outcome and remembers what it was asked.
pub struct FakeClicker {
    outcome: ClickOutcome,
    clicked: Mutex<Vec<String>>,
}

impl FakeClicker {
    pub fn status(status: StatusCode) -> Self {
        Self {
            outcome: ClickOutcome::from_status(status),
            clicked: Mutex::new(Vec::new()),
        }
    }

    pub fn transport_error() -> Self {
        Self {
            outcome: ClickOutcome::transport_error("connection reset by peer"),
            clicked: Mutex::new(Vec::new()),
        }
    }

    pub fn clicked(&self) -> Vec<String> {
        self.clicked.lock().unwrap().clone()
    }
}

#[async_trait]
impl LinkClicker for FakeClicker {
    async fn click(&self, link: &str) -> ClickOutcome {
        self.clicked.lock().unwrap().push(link.to_string());
        self.outcome.clone()
    }
}

/// Memory store whose `insert_record` fails for one Message-ID.
pub struct RejectingStore {
    inner: MemoryStore,
    reject_message_id: String,
}

impl RejectingStore {
    pub fn new(reject_message_id: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            reject_message_id: reject_message_id.to_string(),
        }
    }
}

#[async_trait]
impl AccountStore for RejectingStore {
    async fn upsert_account(&self, account: Account) -> Result<()> {
        self.inner.upsert_account(account).await
    }

    async fn account(&self, id: &str) -> Result<Option<Account>> {
        self.inner.account(id).await
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        self.inner.accounts().await
    }

    async fn delete_account(&self, id: &str) -> Result<bool> {
        self.inner.delete_account(id).await
    }

    async fn monitoring_config(&self) -> Result<MonitoringConfig> {
        self.inner.monitoring_config().await
    }

    async fn set_monitoring_config(&self, config: MonitoringConfig) -> Result<()> {
        self.inner.set_monitoring_config(config).await
    }
}

#[async_trait]
impl LogStore for RejectingStore {
    async fn find_record(&self, key: &DedupKey) -> Result<Option<EmailLogRecord>> {
        self.inner.find_record(key).await
    }

    async fn insert_record(&self, record: EmailLogRecord) -> Result<bool> {
        if record.message_id.as_deref() == Some(self.reject_message_id.as_str()) {
            return Err(Error::Storage {
                operation: "insert_record",
                source: rusqlite::Error::QueryReturnedNoRows,
            });
        }
        self.inner.insert_record(record).await
    }

    async fn records(&self, query: LogQuery) -> Result<Vec<EmailLogRecord>> {
        self.inner.records(query).await
    }

    async fn totals(&self) -> Result<RecordTotals> {
        self.inner.totals().await
    }

    async fn clear_records(&self) -> Result<usize> {
        self.inner.clear_records().await
    }
}

#[async_trait]
impl ActivityLog for RejectingStore {
    async fn append(&self, entry: ActivityEntry) -> Result<()> {
        self.inner.append(entry).await
    }

    async fn entries(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        self.inner.entries(limit).await
    }

    async fn clear_entries(&self) -> Result<usize> {
        self.inner.clear_entries().await
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub source: Arc<FakeMailSource>,
    pub clicker: Arc<FakeClicker>,
    pub monitor: Monitor,
}

impl Harness {
    pub fn new(clicker: FakeClicker) -> Self {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(FakeMailSource::new());
        let clicker = Arc::new(clicker);
        let monitor = Monitor::new(store.clone(), source.clone(), clicker.clone());
        Self {
            store,
            source,
            clicker,
            monitor,
        }
    }
}

pub fn account(id: &str) -> Account {
    Account::builder()
        .id(id)
        .name(format!("{id} account"))
        .email(format!("{id}@example.com"))
        .password("app-password")
        .build()
        .unwrap()
}

fn raw(uid: u32, headers: &str, body: &str) -> RawMessage {
    let text = format!(
        "{headers}MIME-Version: 1.0\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{body}\r\n"
    );
    RawMessage {
        uid,
        bytes: text.into_bytes(),
    }
}

fn headers(subject: &str, message_id: Option<&str>) -> String {
    let mut headers = String::from("From: Netflix <info@account.netflix.com>\r\n");
    headers.push_str("To: viewer@example.com\r\n");
    headers.push_str(&format!("Subject: {subject}\r\n"));
    headers.push_str("Date: Mon, 20 Oct 2025 10:00:00 +0000\r\n");
    if let Some(id) = message_id {
        headers.push_str(&format!("Message-ID: {id}\r\n"));
    }
    headers
}

pub fn household_email(uid: u32, message_id: Option<&str>) -> RawMessage {
    let body = format!(
        "<html><body><p>Hi Sam,</p>\
         <p>A device using your account is not part of your Netflix household.</p>\
         <a href=\"{HOUSEHOLD_LINK}\">Yes, this was me</a></body></html>"
    );
    raw(uid, &headers("Your Netflix household", message_id), &body)
}

pub fn access_code_email(uid: u32, message_id: Option<&str>) -> RawMessage {
    let body = "<html><body><p>Hi Alex,</p><p>Enter this code on your TV</p>\
                <p>482913</p><p>Device</p><p>Living Room TV</p></body></html>";
    raw(uid, &headers("Your temporary access code", message_id), body)
}

pub fn newsletter_email(uid: u32, message_id: Option<&str>) -> RawMessage {
    let body = "<html><body><p>New on Netflix this week</p></body></html>";
    raw(uid, &headers("New arrivals", message_id), body)
}
