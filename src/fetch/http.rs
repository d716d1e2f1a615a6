//! Lightweight fetch strategy: direct requests with session cookies.
//!
//! No rendering. Useful for session probes and for pages whose markup is
//! server-rendered; the site's block signatures still apply, so a blocked
//! response surfaces the same [`FetchError::Blocked`] as the browser
//! strategy would.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderValue, REFERER};
use reqwest::redirect::Policy;
use url::Url;

use crate::session::SessionState;
use crate::stealth::Identity;

use super::{FetchError, FetchResponse, Fetcher, classify_block};

/// Direct-HTTP executor with the stealth identity applied as default
/// headers and the session's cookies in a shared jar. The credible-upstream
/// referrer rides only on the first request, mirroring the rendering
/// strategy's warm-up navigation.
pub struct HttpFetcher {
    client: reqwest::Client,
    referrer: Option<HeaderValue>,
    warmed: AtomicBool,
}

impl HttpFetcher {
    pub fn new(
        identity: &Identity,
        session: Option<&SessionState>,
        base_url: &Url,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());
        if let Some(state) = session {
            for cookie in state.cookie_strings() {
                jar.add_cookie_str(&cookie, base_url);
            }
        }

        let client = reqwest::Client::builder()
            .cookie_provider(jar)
            .default_headers(identity.default_headers())
            .redirect(Policy::limited(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            referrer: identity.referrer.parse().ok(),
            warmed: AtomicBool::new(false),
        })
    }

    /// Referrer for the next request; only the first one carries it.
    fn take_referrer(&self) -> Option<HeaderValue> {
        if self.warmed.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.referrer.clone()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(referrer) = self.take_referrer() {
            request = request.header(REFERER, referrer);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let body = response.text().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(err.to_string())
            }
        })?;

        if let Some(signal) = classify_block(status, &final_url, &body) {
            return Err(FetchError::Blocked {
                signal,
                url: final_url.to_string(),
            });
        }

        Ok(FetchResponse {
            status,
            headers,
            body,
            final_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stealth::StealthConfig;

    fn fetcher() -> HttpFetcher {
        let identity = Identity::sample(&StealthConfig::default());
        let base = Url::parse("https://example.com").unwrap();
        HttpFetcher::new(&identity, None, &base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn referrer_is_spent_on_the_first_request_only() {
        let fetcher = fetcher();
        assert!(fetcher.take_referrer().is_some());
        assert!(fetcher.take_referrer().is_none());
        assert!(fetcher.take_referrer().is_none());
    }
}
