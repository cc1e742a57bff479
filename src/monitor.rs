//! Poll scheduler and the operations exposed around it.
//!
//! [`Monitor`] owns the scheduler state (idle or running, plus the run counters) and a
//! single scan lock. The background loop and [`Monitor::check_now`] both take that lock,
//! so two scans never overlap. Configuration and accounts are reloaded from the store at
//! the start of every cycle; edits apply from the next cycle on.

use crate::actuator::{HttpLinkClicker, LinkClicker};
use crate::config::{Account, MonitoringConfig, TimeoutConfig};
use crate::error::{Error, Result};
use crate::fetcher::{ImapMailSource, MailSource};
use crate::models::{
    ActivityEntry, EmailLogRecord, LogLevel, LogQuery, MonitorStats, RunCounters,
};
use crate::scanner::{ScanReport, Scanner};
use crate::store::Store;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
}

#[derive(Debug)]
struct SchedulerState {
    phase: Phase,
    counters: RunCounters,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    /// Incremented on every start; identifies the current loop.
    generation: u64,
}

/// Outcome of one pass over the active accounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Accounts scanned without a mailbox-level failure.
    pub accounts_scanned: usize,
    /// Accounts whose mailbox could not be read.
    pub accounts_failed: usize,
    /// Sum of the per-account reports.
    pub messages: ScanReport,
}

impl CycleSummary {
    fn absorb(&mut self, report: &ScanReport) {
        let total = &mut self.messages;
        total.fetched += report.fetched;
        total.recorded += report.recorded;
        total.duplicates += report.duplicates;
        total.irrelevant += report.irrelevant;
        total.failed += report.failed;
        total.clicked += report.clicked;
        total.click_failures += report.click_failures;
    }
}

struct Shared {
    store: Arc<dyn Store>,
    source: Arc<dyn MailSource>,
    scanner: Scanner,
    state: Mutex<SchedulerState>,
    scan_lock: tokio::sync::Mutex<()>,
}

/// Multi-account mailbox monitor.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Creates a monitor over explicit collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn MailSource>,
        clicker: Arc<dyn LinkClicker>,
    ) -> Self {
        let scanner = Scanner::new(Arc::clone(&store), Arc::clone(&source), clicker);
        Self {
            shared: Arc::new(Shared {
                store,
                source,
                scanner,
                state: Mutex::new(SchedulerState {
                    phase: Phase::Idle,
                    counters: RunCounters::default(),
                    stop_tx: None,
                    task: None,
                    generation: 0,
                }),
                scan_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Creates a monitor that reads mail over IMAP and clicks links over HTTPS.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the HTTP client cannot be built.
    pub fn with_network(store: Arc<dyn Store>, timeouts: TimeoutConfig) -> Result<Self> {
        let clicker = HttpLinkClicker::new(&timeouts)?;
        Ok(Self::new(
            store,
            Arc::new(ImapMailSource::new(timeouts)),
            Arc::new(clicker),
        ))
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared.state()
    }

    // ── Scheduler ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    #[must_use]
    pub fn counters(&self) -> RunCounters {
        self.state().counters.clone()
    }

    /// Starts the background loop. Starting a running monitor is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveAccounts`] if no account is active, or a storage error
    /// if the accounts cannot be read.
    #[instrument(name = "Monitor::start", skip_all)]
    pub async fn start(&self) -> Result<()> {
        let active = self.shared.store.active_accounts().await?;
        if active.is_empty() {
            warn!("Refusing to start without active accounts");
            return Err(Error::NoActiveAccounts);
        }

        {
            let mut state = self.state();
            if state.phase == Phase::Running {
                debug!("Monitor already running");
                return Ok(());
            }
            let (stop_tx, stop_rx) = watch::channel(false);
            let shared = Arc::clone(&self.shared);
            state.generation += 1;
            let generation = state.generation;
            state.task = Some(tokio::spawn(run_loop(shared, stop_rx, generation)));
            state.stop_tx = Some(stop_tx);
            state.phase = Phase::Running;
        }

        info!(accounts = active.len(), "Monitoring started");
        self.shared
            .note(
                LogLevel::Info,
                format!("Monitoring started for {} account(s)", active.len()),
            )
            .await;
        Ok(())
    }

    /// Stops the background loop and waits for the current cycle to finish.
    ///
    /// An in-flight account scan completes; only the inter-cycle sleep is cut short.
    /// Returns `false` if the monitor was not running.
    #[instrument(name = "Monitor::stop", skip_all)]
    pub async fn stop(&self) -> bool {
        let (stop_tx, task) = {
            let mut state = self.state();
            if state.phase == Phase::Idle {
                return false;
            }
            state.phase = Phase::Idle;
            (state.stop_tx.take(), state.task.take())
        };

        if let Some(tx) = stop_tx {
            // The receiver is gone only if the loop already exited
            let _ = tx.send(true);
        }
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Monitoring loop ended abnormally");
            }
        }

        info!("Monitoring stopped");
        self.shared
            .note(LogLevel::Info, "Monitoring stopped".to_string())
            .await;
        true
    }

    /// Runs one pass over the active accounts now, independent of the loop.
    ///
    /// Waits for a scan in progress to finish first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the configuration or accounts cannot be read.
    #[instrument(name = "Monitor::check_now", skip_all)]
    pub async fn check_now(&self) -> Result<CycleSummary> {
        let config = self.shared.store.monitoring_config().await?;
        let accounts = self.shared.store.active_accounts().await?;
        Ok(self.shared.scan_all(&accounts, &config).await)
    }

    /// Logs in to the account's mailbox and logs out again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for an unknown id, or the connection error.
    #[instrument(name = "Monitor::test_connection", skip(self))]
    pub async fn test_connection(&self, account_id: &str) -> Result<()> {
        let account = self.require_account(account_id).await?;
        match self.shared.source.test_connection(&account).await {
            Ok(()) => {
                self.shared
                    .note(
                        LogLevel::Info,
                        format!("Connection test successful for {}", account.email()),
                    )
                    .await;
                Ok(())
            }
            Err(e) => {
                self.shared
                    .note(
                        LogLevel::Error,
                        format!("Connection test failed for {}: {e}", account.email()),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Aggregates stored totals with the run counters.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the totals cannot be read.
    pub async fn stats(&self) -> Result<MonitorStats> {
        let totals = self.shared.store.totals().await?;
        let active_accounts = self.shared.store.active_accounts().await?.len();
        let (is_monitoring, counters) = {
            let state = self.state();
            (state.phase == Phase::Running, state.counters.clone())
        };
        Ok(MonitorStats {
            total_emails: totals.total,
            household_emails: totals.household,
            access_code_emails: totals.temporary_access,
            links_clicked: totals.clicked,
            errors: totals.errors,
            active_accounts,
            is_monitoring,
            counters,
        })
    }

    // ── Accounts and configuration ─────────────────────────────────────────

    /// Adds or replaces an account.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn save_account(&self, account: Account) -> Result<()> {
        let message = format!("Account saved: {} ({})", account.name, account.email());
        self.shared.store.upsert_account(account).await?;
        self.shared.note(LogLevel::Info, message).await;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn account(&self, id: &str) -> Result<Option<Account>> {
        self.shared.store.account(id).await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.shared.store.accounts().await
    }

    /// Deletes an account. Its log records are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] for an unknown id, or a storage error.
    pub async fn delete_account(&self, id: &str) -> Result<()> {
        if !self.shared.store.delete_account(id).await? {
            return Err(Error::AccountNotFound { id: id.to_string() });
        }
        self.shared
            .note(LogLevel::Info, format!("Account deleted: {id}"))
            .await;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn monitoring_config(&self) -> Result<MonitoringConfig> {
        self.shared.store.monitoring_config().await
    }

    /// Replaces the monitoring configuration. A running loop picks it up next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid, or a storage error.
    pub async fn set_monitoring_config(&self, config: MonitoringConfig) -> Result<()> {
        config.validate()?;
        self.shared.store.set_monitoring_config(config).await?;
        self.shared
            .note(LogLevel::Info, "Monitoring configuration updated".to_string())
            .await;
        Ok(())
    }

    // ── Logs ───────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn records(&self, query: LogQuery) -> Result<Vec<EmailLogRecord>> {
        self.shared.store.records(query).await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn clear_records(&self) -> Result<usize> {
        self.shared.store.clear_records().await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn activity(&self, limit: usize) -> Result<Vec<ActivityEntry>> {
        self.shared.store.entries(limit).await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn clear_activity(&self) -> Result<usize> {
        self.shared.store.clear_entries().await
    }

    async fn require_account(&self, id: &str) -> Result<Account> {
        self.shared
            .store
            .account(id)
            .await?
            .ok_or_else(|| Error::AccountNotFound { id: id.to_string() })
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn note(&self, level: LogLevel, message: String) {
        if let Err(e) = self.store.append(ActivityEntry::new(level, message)).await {
            warn!(error = %e, "Failed to write activity entry");
        }
    }

    /// Scans `accounts` in order under the scan lock. Account failures are recorded,
    /// never returned.
    async fn scan_all(&self, accounts: &[Account], config: &MonitoringConfig) -> CycleSummary {
        let _guard = self.scan_lock.lock().await;
        let mut summary = CycleSummary::default();

        for account in accounts {
            match self.scanner.scan_account(account, config).await {
                Ok(report) => {
                    report.apply_to(&mut self.state().counters);
                    summary.accounts_scanned += 1;
                    summary.absorb(&report);
                }
                Err(e) => {
                    error!(account = %account.name, error = %e, "Account scan failed");
                    self.state().counters.errors += 1;
                    summary.accounts_failed += 1;
                    self.note(
                        LogLevel::Error,
                        format!("Error checking {}: {e}", account.name),
                    )
                    .await;
                }
            }
        }

        self.state().counters.last_check = Some(Utc::now());
        summary
    }

    /// One loop iteration. Returns how long to sleep afterwards.
    async fn run_cycle(&self) -> Result<Duration> {
        let config = self.store.monitoring_config().await?;
        let accounts = self.store.active_accounts().await?;
        if accounts.is_empty() {
            debug!(backoff = ?config.idle_backoff, "No active accounts");
            return Ok(config.idle_backoff);
        }

        let summary = self.scan_all(&accounts, &config).await;
        debug!(?summary, "Cycle finished");
        Ok(config.polling_interval)
    }
}

/// Returns the scheduler to idle when its loop ends without `stop`, e.g. on a panic.
struct IdleOnExit {
    shared: Arc<Shared>,
    generation: u64,
}

impl Drop for IdleOnExit {
    fn drop(&mut self) {
        let mut state = self.shared.state();
        if state.generation != self.generation || state.phase == Phase::Idle {
            return;
        }
        state.phase = Phase::Idle;
        state.stop_tx = None;
        state.task = None;
        if std::thread::panicking() {
            error!("Monitoring loop panicked, monitor is idle");
        } else {
            warn!("Monitoring loop exited unexpectedly, monitor is idle");
        }
    }
}

async fn run_loop(shared: Arc<Shared>, mut stop_rx: watch::Receiver<bool>, generation: u64) {
    let _idle = IdleOnExit {
        shared: Arc::clone(&shared),
        generation,
    };
    info!("Monitoring loop running");
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let delay = match shared.run_cycle().await {
            Ok(delay) => delay,
            Err(e) => {
                error!(error = %e, "Monitoring cycle failed");
                shared.state().counters.errors += 1;
                shared
                    .note(LogLevel::Error, format!("Monitoring cycle failed: {e}"))
                    .await;
                MonitoringConfig::default().idle_backoff
            }
        };

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Monitoring loop exited");
}
