use super::{AccountStore, ActivityLog, LogStore};
use crate::config::{Account, MonitoringConfig};
use crate::error::Result;
use crate::models::{ActivityEntry, DedupKey, EmailLogRecord, LogQuery, RecordTotals};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: Vec<Account>,
    config: Option<MonitoringConfig>,
    records: Vec<EmailLogRecord>,
    activity: Vec<ActivityEntry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn upsert_account(&self, account: Account) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => inner.accounts.push(account),
        }
        Ok(())
    }

    async fn account(&self, id: &str) -> Result<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.inner.read().await.accounts.clone())
    }

    async fn delete_account(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.accounts.len();
        inner.accounts.retain(|a| a.id != id);
        Ok(inner.accounts.len() != before)
    }

    async fn monitoring_config(&self) -> Result<MonitoringConfig> {
        Ok(self.inner.read().await.config.clone().unwrap_or_default())
    }

    async fn set_monitoring_config(&self, config: MonitoringConfig) -> Result<()> {
        config.validate()?;
        self.inner.write().await.config = Some(config);
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn find_record(&self, key: &DedupKey) -> Result<Option<EmailLogRecord>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .find(|r| DedupKey::for_record(r) == *key)
            .cloned())
    }

    async fn insert_record(&self, record: EmailLogRecord) -> Result<bool> {
        let key = DedupKey::for_record(&record);
        let mut inner = self.inner.write().await;
        if inner.records.iter().any(|r| DedupKey::for_record(r) == key) {
            return Ok(false);
        }
        inner.records.push(record);
        Ok(true)
    }

    async fn records(&self, query: LogQuery) -> Result<Vec<EmailLogRecord>> {
        let inner = self.inner.read().await;
        let mut records: Vec<EmailLogRecord> = inner
            .records
            .iter()
            .filter(|r| query.kind.map_or(true, |kind| r.kind == kind))
            .cloned()
            .collect();
        // Stable sort keeps later inserts ahead of earlier ones on equal timestamps
        records.reverse();
        records.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        records.truncate(query.limit);
        Ok(records)
    }

    async fn totals(&self) -> Result<RecordTotals> {
        let inner = self.inner.read().await;
        let mut totals = RecordTotals::default();
        for record in &inner.records {
            totals.add(record);
        }
        Ok(totals)
    }

    async fn clear_records(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let removed = inner.records.len();
        inner.records.clear();
        Ok(removed)
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn append(&self, entry: ActivityEntry) -> Result<()> {
        self.inner.write().await.activity.push(entry);
        Ok(())
    }

    async fn entries(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        let inner = self.inner.read().await;
        Ok(inner.activity.iter().rev().take(limit).cloned().collect())
    }

    async fn clear_entries(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let removed = inner.activity.len();
        inner.activity.clear();
        Ok(removed)
    }
}
