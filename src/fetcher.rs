//! Mailbox access for vendor notifications.
//!
//! [`MailSource`] is the seam between the scan pipeline and the network. The
//! production implementation, [`ImapMailSource`], opens one IMAP session per call:
//!
//! 1. Connect over TLS, authenticate and select `INBOX`
//! 2. Run one `UID SEARCH FROM` per configured sender pattern and union the results
//! 3. Fetch the most recent [`MonitoringConfig::max_messages`] matches
//! 4. Log out
//!
//! Every step is bounded by [`TimeoutConfig`].

use crate::config::{Account, MonitoringConfig, TimeoutConfig};
use crate::error::Result;
use crate::session::{self, ImapSession};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};

/// Undecoded RFC 5322 message as fetched from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Server UID within the selected mailbox.
    pub uid: u32,
    /// Full message bytes, headers included.
    pub bytes: Vec<u8>,
}

/// Source of vendor messages for one account.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Fetches the most recent sender-matched messages, oldest first.
    async fn fetch_messages(
        &self,
        account: &Account,
        config: &MonitoringConfig,
    ) -> Result<Vec<RawMessage>>;

    /// Verifies that the account can log in and open its inbox.
    async fn test_connection(&self, account: &Account) -> Result<()>;
}

/// [`MailSource`] backed by a live IMAP server.
#[derive(Debug, Clone, Default)]
pub struct ImapMailSource {
    timeouts: TimeoutConfig,
}

impl ImapMailSource {
    /// Creates a source with explicit timeouts.
    #[must_use]
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self { timeouts }
    }

    /// Returns the configured timeouts.
    #[must_use]
    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    async fn search_and_fetch(
        &self,
        session: &mut ImapSession,
        config: &MonitoringConfig,
    ) -> Result<Vec<RawMessage>> {
        let matched = session::search_senders(session, &config.sender_patterns, &self.timeouts).await?;
        let uids = recent_suffix(&matched, config.max_messages);

        debug!(
            matched = matched.len(),
            fetching = uids.len(),
            "Sender search finished"
        );

        let bodies = session::fetch_bodies(session, &uids, &self.timeouts).await?;
        Ok(bodies
            .into_iter()
            .map(|(uid, bytes)| RawMessage { uid, bytes })
            .collect())
    }

    async fn close(&self, session: &mut ImapSession) {
        if let Err(e) = session::logout(session, &self.timeouts).await {
            warn!(error = %e, "IMAP logout failed");
        }
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    #[instrument(
        name = "ImapMailSource::fetch_messages",
        skip_all,
        fields(account = %account.name, imap_host = %account.imap_host)
    )]
    async fn fetch_messages(
        &self,
        account: &Account,
        config: &MonitoringConfig,
    ) -> Result<Vec<RawMessage>> {
        let mut session = session::open_inbox(account, &self.timeouts).await?;
        let result = self.search_and_fetch(&mut session, config).await;
        self.close(&mut session).await;

        let mut messages = result?;
        messages.sort_by_key(|m| m.uid);
        Ok(messages)
    }

    #[instrument(
        name = "ImapMailSource::test_connection",
        skip_all,
        fields(account = %account.name, imap_host = %account.imap_host)
    )]
    async fn test_connection(&self, account: &Account) -> Result<()> {
        let mut session = session::open_inbox(account, &self.timeouts).await?;
        session::logout(&mut session, &self.timeouts).await
    }
}

/// Returns the highest `max` UIDs in ascending order.
pub(crate) fn recent_suffix(uids: &BTreeSet<u32>, max: usize) -> Vec<u32> {
    let skip = uids.len().saturating_sub(max);
    uids.iter().skip(skip).copied().collect()
}
