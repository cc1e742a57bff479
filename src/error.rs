//! Error types for the household-watch crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability - see [`Error::is_retryable`]. The monitor
//! never lets a per-account or per-message error escape its loop; these values surface
//! through the activity log, the run counters, and the direct operations
//! ([`Monitor::start`](crate::Monitor::start), [`Monitor::test_connection`](crate::Monitor::test_connection)).

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while monitoring mailboxes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid email address format.
    #[error("invalid email format: {email}")]
    InvalidEmailFormat {
        /// The invalid email address.
        email: String,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (RETRYABLE, except logout)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {email} after {timeout:?}")]
    AuthTimeout {
        /// The email address used for authentication.
        email: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Sender search timeout.
    #[error("search timeout for query '{query}' after {timeout:?}")]
    SearchTimeout {
        /// The IMAP search query.
        query: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for UID set {uid_set} after {timeout:?}")]
    FetchTimeout {
        /// The UID set being fetched.
        uid_set: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors (RETRYABLE - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed.
    #[error("IMAP login failed for {email}")]
    ImapLogin {
        /// The email address used for login.
        email: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed for query '{query}'")]
    ImapSearch {
        /// The IMAP search query.
        query: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID set {uid_set}")]
    ImapFetch {
        /// The UID set that failed.
        uid_set: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Email parsing errors (NOT retryable - malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse email message.
    #[error("failed to parse email")]
    ParseEmail {
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Storage errors
    // ─────────────────────────────────────────────────────────────────────────
    /// SQLite operation failed.
    #[error("storage operation '{operation}' failed")]
    Storage {
        /// The store operation that failed.
        operation: &'static str,
        /// The underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },

    /// A stored row could not be mapped back into a model value.
    #[error("corrupt stored value in column '{column}': {value}")]
    CorruptRecord {
        /// Column holding the bad value.
        column: &'static str,
        /// The value that failed to decode.
        value: String,
    },

    /// Account lookup failed.
    #[error("account not found: {id}")]
    AccountNotFound {
        /// The account identifier.
        id: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Scheduler rejections (NOT retryable until state changes)
    // ─────────────────────────────────────────────────────────────────────────
    /// Monitoring cannot start without at least one active account.
    #[error("no active accounts configured")]
    NoActiveAccounts,
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on
    /// the next poll.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::Storage { .. } => true,

            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. }
            | Error::LogoutTimeout { .. }
            | Error::ImapLogout { .. }
            | Error::ParseEmail { .. }
            | Error::CorruptRecord { .. }
            | Error::AccountNotFound { .. }
            | Error::NoActiveAccounts => false,
        }
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } => ErrorCategory::Parse,

            Error::Storage { .. } | Error::CorruptRecord { .. } | Error::AccountNotFound { .. } => {
                ErrorCategory::Storage
            }

            Error::NoActiveAccounts => ErrorCategory::Scheduler,
        }
    }

    pub(crate) fn storage(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
        move |source| Error::Storage { operation, source }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Email parsing errors.
    Parse,
    /// Persistence errors.
    Storage,
    /// Scheduler state rejections.
    Scheduler,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Scheduler => write!(f, "scheduler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let err = Error::InvalidEmailFormat {
            email: "bad".into(),
        };
        assert!(!err.is_retryable());

        let err = Error::TcpConnect {
            target: "imap.example.com:993".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.is_retryable());

        // Starting again without changing the account list fails the same way
        assert!(!Error::NoActiveAccounts.is_retryable());

        let err = Error::SearchTimeout {
            query: "FROM \"netflix.com\"".into(),
            timeout: Duration::from_secs(10),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        let err = Error::ConnectTimeout {
            target: "imap.example.com:993".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err = Error::AccountNotFound { id: "x".into() };
        assert_eq!(err.category(), ErrorCategory::Storage);

        assert_eq!(Error::NoActiveAccounts.category(), ErrorCategory::Scheduler);
        assert_eq!(ErrorCategory::Scheduler.to_string(), "scheduler");
    }
}
