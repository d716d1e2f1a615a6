//! Fetch contract shared by both retrieval strategies.
//!
//! Two interchangeable executors implement [`Fetcher`]: a full rendering
//! strategy driving a WebDriver browser ([`browser::BrowserFetcher`]) and a
//! lightweight direct-HTTP strategy ([`http::HttpFetcher`]). Both apply the
//! configured stealth identity before the call and classify block pages the
//! same way, so the retry controller never cares which one produced a
//! response.

pub mod browser;
pub mod http;

use std::sync::Arc;

use ::http::HeaderMap;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

pub use browser::{BrowserConfig, BrowserFetcher};
pub use http::HttpFetcher;

/// Raw markup plus response metadata returned by a fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
    /// Url after redirects; block detection inspects it for login bounces.
    pub final_url: Url,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why a response was judged blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSignal {
    /// 429 or an explicit rate-limit page; worth exponential backoff.
    RateLimited,
    /// The site bounced us to login / demanded authentication.
    AuthRequired,
    /// Bot challenge or captcha interstitial; no point retrying blind.
    Challenge,
}

/// Failure classes an executor can produce. Anything else comes back as a
/// [`FetchResponse`] and is judged by the retry controller.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("fetch timed out")]
    Timeout,

    #[error("blocked ({signal:?}) at {url}")]
    Blocked { signal: BlockSignal, url: String },
}

/// One retrieval strategy. Implementations must be safe to call
/// sequentially; concurrent navigations on a single rendering surface are
/// serialized internally.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError>;
}

/// Fetch seam whose backing strategy can be replaced mid-run.
///
/// Every attempt resolves the current inner fetcher at call time, so a
/// session refresh that swaps in a rebuilt client is visible to a retry
/// replay already in flight. Holding a clone of the inner `Arc` across
/// attempts would pin the stale client instead.
pub struct SharedFetcher {
    inner: RwLock<Arc<dyn Fetcher>>,
}

impl SharedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>) -> Self {
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Replace the backing fetcher; in-flight retries pick it up on their
    /// next attempt.
    pub async fn swap(&self, inner: Arc<dyn Fetcher>) {
        *self.inner.write().await = inner;
    }
}

#[async_trait]
impl Fetcher for SharedFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let current = self.inner.read().await.clone();
        current.fetch(url).await
    }
}

static RATE_LIMIT_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"(too many requests|you are being rate limited)")
        .case_insensitive(true)
        .build()
        .expect("invalid rate limit regex")
});

static AUTH_WALL_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r#"(sign in to (read|continue)|create a free account to|data-test-id="login-form"|"isLoggedIn"\s*:\s*false.{0,200}subscribe now)"#,
    )
    .case_insensitive(true)
    .dot_matches_new_line(true)
    .build()
    .expect("invalid auth wall regex")
});

static CHALLENGE_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r"(press\s*&\s*hold|are you a (ro)?bot|px-captcha|perimeterx|access to this page has been denied|verify you are human)",
    )
    .case_insensitive(true)
    .build()
    .expect("invalid challenge regex")
});

/// Classify a response against the site's block signatures.
///
/// Returns `None` for ordinary responses; the retry controller then only has
/// to distinguish success from unexpected statuses.
pub fn classify_block(status: u16, final_url: &Url, body: &str) -> Option<BlockSignal> {
    if status == 429 || RATE_LIMIT_RE.is_match(body) {
        return Some(BlockSignal::RateLimited);
    }

    if final_url.path().starts_with("/login") || AUTH_WALL_RE.is_match(body) {
        return Some(BlockSignal::AuthRequired);
    }

    if status == 403 || CHALLENGE_RE.is_match(body) {
        return Some(BlockSignal::Challenge);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn status_429_is_rate_limited() {
        let signal = classify_block(429, &url("https://example.com/p"), "<html></html>");
        assert_eq!(signal, Some(BlockSignal::RateLimited));
    }

    #[test]
    fn login_bounce_is_auth_required() {
        let signal = classify_block(200, &url("https://example.com/login?next=%2F"), "<html></html>");
        assert_eq!(signal, Some(BlockSignal::AuthRequired));
    }

    #[test]
    fn auth_wall_body_is_auth_required() {
        let body = "<div>Sign in to continue reading this transcript</div>";
        let signal = classify_block(200, &url("https://example.com/article/1"), body);
        assert_eq!(signal, Some(BlockSignal::AuthRequired));
    }

    #[test]
    fn status_403_is_challenge() {
        let signal = classify_block(403, &url("https://example.com/p"), "<html></html>");
        assert_eq!(signal, Some(BlockSignal::Challenge));
    }

    #[test]
    fn challenge_page_detected_on_200() {
        let body = r#"<div id="px-captcha">Press & Hold to confirm you are a human</div>"#;
        let signal = classify_block(200, &url("https://example.com/p"), body);
        assert_eq!(signal, Some(BlockSignal::Challenge));
    }

    #[test]
    fn plain_page_is_not_blocked() {
        let body = "<html><body><article>hello</article></body></html>";
        assert_eq!(classify_block(200, &url("https://example.com/p"), body), None);
        assert_eq!(classify_block(404, &url("https://example.com/p"), body), None);
    }
}
