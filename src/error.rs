//! Crate-level error taxonomy.
//!
//! Transient failures (network, timeout, rate-limited blocks) are retried by
//! the retry controller and only show up here after the retry budget is
//! exhausted. Everything else aborts the current operation with enough
//! context (url, attempts, last status) to diagnose a site-structure change.

use thiserror::Error;

/// High-level error surfaced by the pipeline.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The interactive login flow did not complete within its deadline.
    #[error("login not completed within {timeout_secs}s")]
    LoginTimeout { timeout_secs: u64 },

    /// The site demanded authentication again after one re-acquisition.
    #[error("session expired and re-authentication did not restore access ({url})")]
    SessionExpired { url: String },

    /// Rate limiting persisted through the whole backoff budget.
    #[error("rate limited after {attempts} attempts ({url})")]
    RateLimited { url: String, attempts: u32 },

    /// A non-rate-limit block (bot challenge / captcha page). Not retried.
    #[error("request blocked by anti-bot challenge ({url})")]
    Blocked { url: String },

    /// Connection-level or timeout failures that outlived the retry budget.
    #[error("fetch failed after {attempts} attempts ({url}): {last_error}")]
    FetchFailed {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// Any other non-2xx status; likely a site-structure change, so it is
    /// surfaced immediately instead of burning retry budget.
    #[error("unexpected status {status} ({url})")]
    UnexpectedStatus { url: String, status: u16 },

    /// A structural pattern was missing where the pipeline requires one.
    #[error("parse error: {0}")]
    Parse(String),

    /// The caller's cancellation signal fired at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    /// Rendering surface setup/teardown trouble outside WebDriver's own
    /// error types (TLS init, surface already closed).
    #[error("rendering surface error: {0}")]
    Surface(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webdriver session error: {0}")]
    WebDriverSession(#[from] fantoccini::error::NewSessionError),

    #[error("webdriver command error: {0}")]
    WebDriver(#[from] fantoccini::error::CmdError),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result alias used across the crate.
pub type ScrapeResult<T> = Result<T, ScrapeError>;

impl ScrapeError {
    /// Whether the error ends the whole run rather than a single item.
    ///
    /// Per-item parse trouble degrades the record instead of raising, so a
    /// `Parse` here already means a required structure was missing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::SessionExpired { .. }
                | ScrapeError::RateLimited { .. }
                | ScrapeError::LoginTimeout { .. }
                | ScrapeError::Cancelled
        )
    }
}
