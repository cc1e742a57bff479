//! Following household verification links.
//!
//! The vendor's confirmation page only needs a browser-like GET; any redirect chain is
//! followed and the final status decides the outcome.

use crate::config::TimeoutConfig;
use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// User agent sent with every click.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const MAX_REDIRECTS: usize = 10;

/// Result of a click attempt. Transport failures are folded in rather than raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickOutcome {
    /// Whether the link was considered followed.
    pub success: bool,
    /// Short human-readable note stored on the log record.
    pub note: String,
}

impl ClickOutcome {
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        let success = interpret_status(status);
        let prefix = if success { "Success" } else { "Failed" };
        Self {
            success,
            note: format!("{prefix}: Status {}", status.as_u16()),
        }
    }

    #[must_use]
    pub fn transport_error(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            note: format!("Error: {message}"),
        }
    }
}

/// 200, 301 and 302 count as a followed link.
#[must_use]
pub fn interpret_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
    )
}

/// Performs the HTTP request behind a verification link.
#[async_trait]
pub trait LinkClicker: Send + Sync {
    async fn click(&self, link: &str) -> ClickOutcome;
}

/// [`LinkClicker`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpLinkClicker {
    client: Client,
}

impl HttpLinkClicker {
    /// Builds a clicker whose total request time is bounded by `timeouts.click`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if the HTTP client cannot be built
    /// (for example, when no TLS backend is available).
    pub fn new(timeouts: &TimeoutConfig) -> crate::Result<Self> {
        Self::with_timeout(timeouts.click)
    }

    /// Builds a clicker with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidConfig`] if the HTTP client cannot be built.
    pub fn with_timeout(timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::InvalidConfig {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkClicker for HttpLinkClicker {
    #[instrument(name = "HttpLinkClicker::click", skip_all)]
    async fn click(&self, link: &str) -> ClickOutcome {
        match self.client.get(link).send().await {
            Ok(response) => {
                let outcome = ClickOutcome::from_status(response.status());
                debug!(status = %response.status(), success = outcome.success, "Link followed");
                outcome
            }
            Err(e) => {
                warn!(error = %e, "Link click failed");
                ClickOutcome::transport_error(e)
            }
        }
    }
}
