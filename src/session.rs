//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with timeouts and error mapping.

use crate::config::{Account, TimeoutConfig};
use crate::connection::{self, TlsStream};
use crate::error::{Error, Result};
use async_imap::Session;
use futures::StreamExt;
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};

/// Type alias for IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

const INBOX: &str = "INBOX";

/// Connects, authenticates and selects the INBOX.
#[instrument(
    name = "session::open",
    skip_all,
    fields(account = %account.name, imap_host = %account.imap_host)
)]
pub(crate) async fn open_inbox(account: &Account, timeouts: &TimeoutConfig) -> Result<ImapSession> {
    let tls_stream =
        connection::establish_tls_connection(&account.imap_host, account.imap_port, timeouts.connect)
            .await?;

    debug!("TLS connection established");

    let client = async_imap::Client::new(tls_stream);
    let mut session = tokio::time::timeout(
        timeouts.auth,
        client.login(account.email(), account.password()),
    )
    .await
    .map_err(|_| Error::AuthTimeout {
        email: account.email().to_string(),
        timeout: timeouts.auth,
    })?
    .map_err(|e| Error::ImapLogin {
        email: account.email().to_string(),
        source: e.0,
    })?;

    debug!("Authenticated");

    tokio::time::timeout(timeouts.select, session.select(INBOX))
        .await
        .map_err(|_| Error::SelectTimeout {
            mailbox: INBOX.to_string(),
            timeout: timeouts.select,
        })?
        .map_err(|source| Error::SelectMailbox {
            mailbox: INBOX.to_string(),
            source,
        })?;

    debug!("Selected INBOX");

    Ok(session)
}

/// Builds the `FROM` search query for one sender pattern.
pub(crate) fn from_query(pattern: &str) -> String {
    let escaped = pattern.replace('\\', "\\\\").replace('"', "\\\"");
    format!("FROM \"{escaped}\"")
}

/// Runs one `UID SEARCH FROM` per pattern and unions the results in ascending order.
///
/// A pattern that fails or times out is logged and skipped as long as at least one
/// search succeeded, since providers reject some header forms.
#[instrument(name = "session::search_senders", skip_all, fields(patterns = patterns.len()))]
pub(crate) async fn search_senders(
    session: &mut ImapSession,
    patterns: &[String],
    timeouts: &TimeoutConfig,
) -> Result<BTreeSet<u32>> {
    let mut tally = SearchTally::default();

    for pattern in patterns.iter().filter(|p| !p.trim().is_empty()) {
        let query = from_query(pattern);
        let outcome = match tokio::time::timeout(timeouts.search, session.uid_search(&query)).await
        {
            Ok(Ok(found)) => Ok(found),
            Ok(Err(source)) => Err(Error::ImapSearch {
                query: query.clone(),
                source,
            }),
            Err(_) => Err(Error::SearchTimeout {
                query: query.clone(),
                timeout: timeouts.search,
            }),
        };
        tally.record(&query, outcome);
    }

    tally.finish()
}

/// Union of per-pattern search results.
#[derive(Debug, Default)]
struct SearchTally {
    uids: BTreeSet<u32>,
    succeeded: usize,
    last_error: Option<Error>,
}

impl SearchTally {
    fn record<I>(&mut self, query: &str, outcome: Result<I>)
    where
        I: IntoIterator<Item = u32>,
    {
        match outcome {
            Ok(found) => {
                self.succeeded += 1;
                let before = self.uids.len();
                self.uids.extend(found);
                debug!(query = %query, new = self.uids.len() - before, "Sender search complete");
            }
            Err(e) => {
                warn!(query = %query, error = %e, "Sender search failed");
                self.last_error = Some(e);
            }
        }
    }

    /// Errors only when every search failed.
    fn finish(self) -> Result<BTreeSet<u32>> {
        match self.last_error {
            Some(err) if self.succeeded == 0 => Err(err),
            _ => Ok(self.uids),
        }
    }
}

/// Fetches full bodies for `uids` without setting `\Seen`.
pub(crate) async fn fetch_bodies(
    session: &mut ImapSession,
    uids: &[u32],
    timeouts: &TimeoutConfig,
) -> Result<Vec<(u32, Vec<u8>)>> {
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let uid_set = uids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");

    debug!(uid_set = %uid_set, "Fetching messages");

    let fetch = async {
        let mut stream = session
            .uid_fetch(&uid_set, "BODY.PEEK[]")
            .await
            .map_err(|source| Error::ImapFetch {
                uid_set: uid_set.clone(),
                source,
            })?;

        let mut bodies = Vec::with_capacity(uids.len());
        while let Some(item) = stream.next().await {
            let message = item.map_err(|source| Error::ImapFetch {
                uid_set: uid_set.clone(),
                source,
            })?;
            match (message.uid, message.body()) {
                (Some(uid), Some(body)) => bodies.push((uid, body.to_vec())),
                (uid, _) => debug!(?uid, "Fetch response without body, skipping"),
            }
        }
        Ok::<_, Error>(bodies)
    };

    tokio::time::timeout(timeouts.fetch, fetch)
        .await
        .map_err(|_| Error::FetchTimeout {
            uid_set: uid_set.clone(),
            timeout: timeouts.fetch,
        })?
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip_all)]
pub(crate) async fn logout(session: &mut ImapSession, timeouts: &TimeoutConfig) -> Result<()> {
    debug!("Logging out");

    tokio::time::timeout(timeouts.logout, session.logout())
        .await
        .map_err(|_| Error::LogoutTimeout {
            timeout: timeouts.logout,
        })?
        .map_err(|source| Error::ImapLogout { source })
}
