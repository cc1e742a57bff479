use super::{AccountStore, ActivityLog, LogStore};
use crate::config::{Account, MonitoringConfig};
use crate::error::{Error, Result};
use crate::models::{
    ActivityEntry, DedupKey, EmailKind, EmailLogRecord, LogLevel, LogQuery, RecordStatus,
    RecordTotals,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id          TEXT PRIMARY KEY,
    position    INTEGER NOT NULL,
    name        TEXT NOT NULL,
    email       TEXT NOT NULL,
    password    TEXT NOT NULL,
    imap_host   TEXT NOT NULL,
    imap_port   INTEGER NOT NULL,
    active      INTEGER NOT NULL,
    auto_click  INTEGER,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS monitoring_config (
    id                  INTEGER PRIMARY KEY CHECK (id = 1),
    polling_interval_ms INTEGER NOT NULL,
    auto_click          INTEGER NOT NULL,
    sender_patterns     TEXT NOT NULL,
    max_messages        INTEGER NOT NULL,
    idle_backoff_ms     INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS email_logs (
    id                TEXT PRIMARY KEY,
    account_id        TEXT NOT NULL,
    account_name      TEXT NOT NULL,
    message_id        TEXT,
    subject           TEXT NOT NULL,
    sender            TEXT NOT NULL,
    recipient         TEXT NOT NULL,
    kind              TEXT NOT NULL,
    verification_link TEXT,
    access_code       TEXT,
    device_info       TEXT,
    status            TEXT NOT NULL,
    click_response    TEXT,
    body_preview      TEXT NOT NULL,
    received_at       TEXT NOT NULL,
    processed_at      TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS email_logs_message_id
    ON email_logs (account_id, message_id) WHERE message_id IS NOT NULL;

CREATE UNIQUE INDEX IF NOT EXISTS email_logs_composite
    ON email_logs (account_id, subject, sender) WHERE message_id IS NULL;

CREATE INDEX IF NOT EXISTS email_logs_processed_at ON email_logs (processed_at);

CREATE TABLE IF NOT EXISTS activity_log (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    id        TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    level     TEXT NOT NULL,
    message   TEXT NOT NULL
);
";

const RECORD_COLUMNS: &str = "id, account_id, account_name, message_id, subject, sender, \
     recipient, kind, verification_link, access_code, device_info, status, click_response, \
     body_preview, received_at, processed_at";

/// SQLite-backed store.
///
/// Calls run on the async task that issues them; each one is a short single statement
/// against a local file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(Error::storage("open"))?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::storage("open"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(Error::storage("migrate"))?;
        debug!("SQLite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Fixed width so text ordering matches time ordering
fn to_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| Error::CorruptRecord {
            column,
            value: value.to_string(),
        })
}

fn parse_enum<T: std::str::FromStr>(column: &'static str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::CorruptRecord {
        column,
        value: value.to_string(),
    })
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn from_millis(column: &'static str, value: i64) -> Result<Duration> {
    u64::try_from(value)
        .map(Duration::from_millis)
        .map_err(|_| Error::CorruptRecord {
            column,
            value: value.to_string(),
        })
}

struct AccountRow {
    id: String,
    name: String,
    email: String,
    password: String,
    imap_host: String,
    imap_port: i64,
    active: bool,
    auto_click: Option<bool>,
    created_at: String,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            password: row.get(3)?,
            imap_host: row.get(4)?,
            imap_port: row.get(5)?,
            active: row.get(6)?,
            auto_click: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_account(self) -> Result<Account> {
        let port = u16::try_from(self.imap_port).map_err(|_| Error::CorruptRecord {
            column: "imap_port",
            value: self.imap_port.to_string(),
        })?;
        let mut builder = Account::builder()
            .id(self.id)
            .name(self.name)
            .email(self.email)
            .password(self.password)
            .imap_host(self.imap_host)
            .imap_port(port)
            .active(self.active)
            .created_at(parse_ts("created_at", &self.created_at)?);
        if let Some(flag) = self.auto_click {
            builder = builder.auto_click(flag);
        }
        builder.build()
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, name, email, password, imap_host, imap_port, active, auto_click, created_at";

struct RecordRow {
    id: String,
    account_id: String,
    account_name: String,
    message_id: Option<String>,
    subject: String,
    sender: String,
    recipient: String,
    kind: String,
    verification_link: Option<String>,
    access_code: Option<String>,
    device_info: Option<String>,
    status: String,
    click_response: Option<String>,
    body_preview: String,
    received_at: String,
    processed_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            account_name: row.get(2)?,
            message_id: row.get(3)?,
            subject: row.get(4)?,
            sender: row.get(5)?,
            recipient: row.get(6)?,
            kind: row.get(7)?,
            verification_link: row.get(8)?,
            access_code: row.get(9)?,
            device_info: row.get(10)?,
            status: row.get(11)?,
            click_response: row.get(12)?,
            body_preview: row.get(13)?,
            received_at: row.get(14)?,
            processed_at: row.get(15)?,
        })
    }

    fn into_record(self) -> Result<EmailLogRecord> {
        Ok(EmailLogRecord {
            kind: parse_enum("kind", &self.kind)?,
            status: parse_enum("status", &self.status)?,
            received_at: parse_ts("received_at", &self.received_at)?,
            processed_at: parse_ts("processed_at", &self.processed_at)?,
            id: self.id,
            account_id: self.account_id,
            account_name: self.account_name,
            message_id: self.message_id,
            subject: self.subject,
            sender: self.sender,
            recipient: self.recipient,
            verification_link: self.verification_link,
            access_code: self.access_code,
            device_info: self.device_info,
            click_response: self.click_response,
            body_preview: self.body_preview,
        })
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn upsert_account(&self, account: Account) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO accounts (id, position, name, email, password, imap_host, imap_port,
                                   active, auto_click, created_at)
             VALUES (?1, (SELECT COALESCE(MAX(position), 0) + 1 FROM accounts),
                     ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 email = excluded.email,
                 password = excluded.password,
                 imap_host = excluded.imap_host,
                 imap_port = excluded.imap_port,
                 active = excluded.active,
                 auto_click = excluded.auto_click",
            params![
                account.id,
                account.name,
                account.email(),
                account.password(),
                account.imap_host,
                i64::from(account.imap_port),
                account.active,
                account.auto_click,
                to_text(account.created_at),
            ],
        )
        .map_err(Error::storage("upsert_account"))?;
        Ok(())
    }

    async fn account(&self, id: &str) -> Result<Option<Account>> {
        let row = {
            let conn = self.lock();
            conn.query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id],
                AccountRow::from_row,
            )
            .optional()
            .map_err(Error::storage("account"))?
        };
        row.map(AccountRow::into_account).transpose()
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        let rows = {
            let conn = self.lock();
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY position"
                ))
                .map_err(Error::storage("accounts"))?;
            let rows = stmt
                .query_map([], AccountRow::from_row)
                .map_err(Error::storage("accounts"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage("accounts"))?;
            rows
        };
        rows.into_iter().map(AccountRow::into_account).collect()
    }

    async fn delete_account(&self, id: &str) -> Result<bool> {
        let conn = self.lock();
        let removed = conn
            .execute("DELETE FROM accounts WHERE id = ?1", params![id])
            .map_err(Error::storage("delete_account"))?;
        Ok(removed > 0)
    }

    async fn monitoring_config(&self) -> Result<MonitoringConfig> {
        let row = {
            let conn = self.lock();
            conn.query_row(
                "SELECT polling_interval_ms, auto_click, sender_patterns, max_messages,
                        idle_backoff_ms
                 FROM monitoring_config WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(Error::storage("monitoring_config"))?
        };

        let Some((interval, auto_click, senders, max_messages, backoff)) = row else {
            return Ok(MonitoringConfig::default());
        };

        Ok(MonitoringConfig {
            polling_interval: from_millis("polling_interval_ms", interval)?,
            auto_click,
            sender_patterns: senders.lines().map(str::to_string).collect(),
            max_messages: usize::try_from(max_messages).map_err(|_| Error::CorruptRecord {
                column: "max_messages",
                value: max_messages.to_string(),
            })?,
            idle_backoff: from_millis("idle_backoff_ms", backoff)?,
        })
    }

    async fn set_monitoring_config(&self, config: MonitoringConfig) -> Result<()> {
        config.validate()?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO monitoring_config
                 (id, polling_interval_ms, auto_click, sender_patterns, max_messages, idle_backoff_ms)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 polling_interval_ms = excluded.polling_interval_ms,
                 auto_click = excluded.auto_click,
                 sender_patterns = excluded.sender_patterns,
                 max_messages = excluded.max_messages,
                 idle_backoff_ms = excluded.idle_backoff_ms",
            params![
                millis(config.polling_interval),
                config.auto_click,
                config.sender_patterns.join("\n"),
                i64::try_from(config.max_messages).unwrap_or(i64::MAX),
                millis(config.idle_backoff),
            ],
        )
        .map_err(Error::storage("set_monitoring_config"))?;
        Ok(())
    }
}

#[async_trait]
impl LogStore for SqliteStore {
    async fn find_record(&self, key: &DedupKey) -> Result<Option<EmailLogRecord>> {
        let row = {
            let conn = self.lock();
            let result = match key {
                DedupKey::MessageId {
                    account_id,
                    message_id,
                } => conn.query_row(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM email_logs
                         WHERE account_id = ?1 AND message_id = ?2"
                    ),
                    params![account_id, message_id],
                    RecordRow::from_row,
                ),
                DedupKey::Composite {
                    account_id,
                    subject,
                    sender,
                } => conn.query_row(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM email_logs
                         WHERE account_id = ?1 AND message_id IS NULL
                           AND subject = ?2 AND sender = ?3"
                    ),
                    params![account_id, subject, sender],
                    RecordRow::from_row,
                ),
            };
            result.optional().map_err(Error::storage("find_record"))?
        };
        row.map(RecordRow::into_record).transpose()
    }

    async fn insert_record(&self, record: EmailLogRecord) -> Result<bool> {
        // Blank ids share the composite key, matching DedupKey
        let message_id = record
            .message_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let conn = self.lock();
        let inserted = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO email_logs ({RECORD_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    record.id,
                    record.account_id,
                    record.account_name,
                    message_id,
                    record.subject,
                    record.sender,
                    record.recipient,
                    record.kind.as_str(),
                    record.verification_link,
                    record.access_code,
                    record.device_info,
                    record.status.as_str(),
                    record.click_response,
                    record.body_preview,
                    to_text(record.received_at),
                    to_text(record.processed_at),
                ],
            )
            .map_err(Error::storage("insert_record"))?;
        Ok(inserted > 0)
    }

    async fn records(&self, query: LogQuery) -> Result<Vec<EmailLogRecord>> {
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = {
            let conn = self.lock();
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM email_logs
                 WHERE (?1 IS NULL OR kind = ?1)
                 ORDER BY processed_at DESC, rowid DESC
                 LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql).map_err(Error::storage("records"))?;
            let rows = stmt
                .query_map(
                    params![query.kind.map(EmailKind::as_str), limit],
                    RecordRow::from_row,
                )
                .map_err(Error::storage("records"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage("records"))?;
            rows
        };
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn totals(&self) -> Result<RecordTotals> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT kind, status, COUNT(*) FROM email_logs GROUP BY kind, status")
            .map_err(Error::storage("totals"))?;
        let groups = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(Error::storage("totals"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::storage("totals"))?;

        let mut totals = RecordTotals::default();
        for (kind, status, count) in groups {
            let count = usize::try_from(count).unwrap_or(0);
            totals.total += count;
            match parse_enum::<EmailKind>("kind", &kind)? {
                EmailKind::HouseholdUpdate => totals.household += count,
                EmailKind::TemporaryAccess => totals.temporary_access += count,
                EmailKind::Other => {}
            }
            match parse_enum::<RecordStatus>("status", &status)? {
                RecordStatus::Clicked => totals.clicked += count,
                RecordStatus::Error => totals.errors += count,
                RecordStatus::Detected => {}
            }
        }
        Ok(totals)
    }

    async fn clear_records(&self) -> Result<usize> {
        let conn = self.lock();
        conn.execute("DELETE FROM email_logs", [])
            .map_err(Error::storage("clear_records"))
    }
}

#[async_trait]
impl ActivityLog for SqliteStore {
    async fn append(&self, entry: ActivityEntry) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO activity_log (id, timestamp, level, message) VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.id,
                to_text(entry.timestamp),
                entry.level.as_str(),
                entry.message
            ],
        )
        .map_err(Error::storage("append_activity"))?;
        Ok(())
    }

    async fn entries(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = {
            let conn = self.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, timestamp, level, message FROM activity_log
                     ORDER BY seq DESC LIMIT ?1",
                )
                .map_err(Error::storage("activity"))?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(Error::storage("activity"))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(Error::storage("activity"))?;
            rows
        };

        rows.into_iter()
            .map(|(id, timestamp, level, message)| {
                Ok(ActivityEntry {
                    id,
                    timestamp: parse_ts("timestamp", &timestamp)?,
                    level: parse_enum::<LogLevel>("level", &level)?,
                    message,
                })
            })
            .collect()
    }

    async fn clear_entries(&self) -> Result<usize> {
        let conn = self.lock();
        conn.execute("DELETE FROM activity_log", [])
            .map_err(Error::storage("clear_activity"))
    }
}
