//! Retry and failure-classification layer between the pipeline and a
//! [`Fetcher`].
//!
//! Every outcome of an attempt falls into one class with its own policy:
//! success passes through, rate limiting gets exponential backoff, an
//! authentication wall gets exactly one session re-acquisition, bot
//! challenges and unexpected statuses abort immediately, and plain network
//! trouble gets a short fixed-delay retry. Cancellation is honored at every
//! sleep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{ScrapeError, ScrapeResult};
use crate::fetch::{BlockSignal, FetchError, FetchResponse, Fetcher};

/// Hook invoked when the site demands authentication mid-run. Implementors
/// re-acquire the session (interactive login included) and apply it to the
/// active fetchers; the controller then replays the request once.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    async fn refresh(&self) -> ScrapeResult<()>;
}

/// Attempt budgets and delays.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Backed-off retries after a rate-limited response, backoff doubling
    /// each time. The budget counts retries, so a value of 3 allows four
    /// fetches in total.
    pub rate_limit_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Uniform jitter added to each backoff sleep.
    pub backoff_jitter: Duration,
    /// Fixed-delay retries after connection-level and timeout failures.
    pub transient_attempts: u32,
    pub transient_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_attempts: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(60),
            backoff_jitter: Duration::from_millis(750),
            transient_attempts: 2,
            transient_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based), jitter included.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
            .min(self.backoff_cap);
        let jitter_ms = self.backoff_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Drives one logical fetch through its attempt budget.
pub struct RetryController {
    policy: RetryPolicy,
    refresher: Option<Arc<dyn SessionRefresher>>,
    cancel: CancellationToken,
}

impl RetryController {
    pub fn new(
        policy: RetryPolicy,
        refresher: Option<Arc<dyn SessionRefresher>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy,
            refresher,
            cancel,
        }
    }

    /// Fetch `url` through `fetcher`, retrying per the policy. Returns the
    /// first successful 2xx response or the classified terminal error.
    pub async fn fetch(&self, fetcher: &dyn Fetcher, url: &Url) -> ScrapeResult<FetchResponse> {
        let mut rate_limit_attempts = 0u32;
        let mut transient_attempts = 0u32;
        let mut last_transient = String::new();
        let mut refreshed = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }

            match fetcher.fetch(url).await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    // Non-2xx that is not a recognized block signature is a
                    // site-structure change; retrying will not help.
                    return Err(ScrapeError::UnexpectedStatus {
                        url: url.to_string(),
                        status: response.status,
                    });
                }
                Err(FetchError::Blocked {
                    signal: BlockSignal::RateLimited,
                    ..
                }) => {
                    rate_limit_attempts += 1;
                    if rate_limit_attempts > self.policy.rate_limit_attempts {
                        return Err(ScrapeError::RateLimited {
                            url: url.to_string(),
                            attempts: rate_limit_attempts,
                        });
                    }
                    let delay = self.policy.backoff_delay(rate_limit_attempts);
                    log::warn!(
                        "rate limited at {url} (attempt {rate_limit_attempts}), backing off {delay:?}"
                    );
                    self.sleep(delay).await?;
                }
                Err(FetchError::Blocked {
                    signal: BlockSignal::AuthRequired,
                    ..
                }) => {
                    if refreshed {
                        return Err(ScrapeError::SessionExpired {
                            url: url.to_string(),
                        });
                    }
                    let Some(refresher) = self.refresher.as_ref() else {
                        return Err(ScrapeError::SessionExpired {
                            url: url.to_string(),
                        });
                    };
                    log::warn!("authentication wall at {url}, re-acquiring session");
                    refresher.refresh().await?;
                    refreshed = true;
                }
                Err(FetchError::Blocked {
                    signal: BlockSignal::Challenge,
                    url: blocked_url,
                }) => {
                    // Hammering a bot challenge only digs the hole deeper.
                    return Err(ScrapeError::Blocked { url: blocked_url });
                }
                Err(err @ (FetchError::Network(_) | FetchError::Timeout)) => {
                    transient_attempts += 1;
                    last_transient = err.to_string();
                    if transient_attempts > self.policy.transient_attempts {
                        return Err(ScrapeError::FetchFailed {
                            url: url.to_string(),
                            attempts: transient_attempts,
                            last_error: last_transient,
                        });
                    }
                    log::debug!(
                        "transient failure at {url} (attempt {transient_attempts}): {last_transient}"
                    );
                    self.sleep(self.policy.transient_delay).await?;
                }
            }
        }
    }

    /// Cancellation-aware sleep.
    async fn sleep(&self, delay: Duration) -> ScrapeResult<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ScrapeError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
