//! Persistence seams used by the monitor.
//!
//! Three narrow traits cover the collaborators the scan pipeline talks to:
//! [`AccountStore`] (accounts and the monitoring configuration), [`LogStore`]
//! (email log records, deduplicated by [`DedupKey`]) and [`ActivityLog`]
//! (operator-facing diagnostics). [`Store`] bundles all three.
//!
//! Two backends are provided: [`MemoryStore`] and [`SqliteStore`].

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{Account, MonitoringConfig};
use crate::error::Result;
use crate::models::{ActivityEntry, DedupKey, EmailLogRecord, LogQuery, RecordTotals};
use async_trait::async_trait;

/// Accounts and the singleton monitoring configuration.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Inserts or replaces the account with the same id.
    async fn upsert_account(&self, account: Account) -> Result<()>;

    async fn account(&self, id: &str) -> Result<Option<Account>>;

    /// All accounts in creation order.
    async fn accounts(&self) -> Result<Vec<Account>>;

    /// Accounts with `active == true`, in creation order.
    async fn active_accounts(&self) -> Result<Vec<Account>> {
        Ok(self
            .accounts()
            .await?
            .into_iter()
            .filter(|a| a.active)
            .collect())
    }

    /// Returns `true` if an account was removed.
    async fn delete_account(&self, id: &str) -> Result<bool>;

    /// Current configuration, or the default when none was saved.
    async fn monitoring_config(&self) -> Result<MonitoringConfig>;

    async fn set_monitoring_config(&self, config: MonitoringConfig) -> Result<()>;
}

/// Append-only email log records.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn find_record(&self, key: &DedupKey) -> Result<Option<EmailLogRecord>>;

    /// Writes `record` unless one with the same [`DedupKey`] exists.
    ///
    /// Returns `false` when the record was a duplicate and nothing was written.
    async fn insert_record(&self, record: EmailLogRecord) -> Result<bool>;

    /// Records newest first, filtered and limited by `query`.
    async fn records(&self, query: LogQuery) -> Result<Vec<EmailLogRecord>>;

    async fn totals(&self) -> Result<RecordTotals>;

    /// Removes every record; returns how many were removed.
    async fn clear_records(&self) -> Result<usize>;
}

/// Operator-facing activity trail.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append(&self, entry: ActivityEntry) -> Result<()>;

    /// Newest first.
    async fn entries(&self, limit: usize) -> Result<Vec<ActivityEntry>>;

    async fn clear_entries(&self) -> Result<usize>;
}

/// Everything the monitor needs from storage.
pub trait Store: AccountStore + LogStore + ActivityLog {}

impl<T: AccountStore + LogStore + ActivityLog> Store for T {}
