//! Full rendering strategy: a WebDriver-controlled browser.
//!
//! One fetcher owns one browsing context for the pipeline's lifetime.
//! Navigations are serialized behind a mutex because cookies and DOM state
//! are shared across the whole context; callers wanting parallelism must
//! open independent fetchers. WebDriver exposes neither response status nor
//! headers, so successful fetches report status 200 with empty headers and
//! block states are detected from the rendered body and final url.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fantoccini::cookies::Cookie;
use fantoccini::{Client, ClientBuilder, Locator};
use http::HeaderMap;
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{ScrapeError, ScrapeResult};
use crate::session::StoredCookie;
use crate::stealth::{Identity, STEALTH_SCRIPT};

use super::{FetchError, FetchResponse, Fetcher, classify_block};

/// Rendering surface configuration.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// WebDriver endpoint (chromedriver / selenium).
    pub webdriver_url: String,
    pub headless: bool,
    /// Selector whose presence marks the page as content-ready.
    pub ready_selector: String,
    /// How long to wait for the readiness selector before giving up and
    /// taking the source as-is.
    pub ready_timeout: Duration,
    pub nav_timeout: Duration,
    /// Post-load settle time for late-hydrating content.
    pub settle: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:4444".into(),
            headless: true,
            ready_selector: "article, main".into(),
            ready_timeout: Duration::from_secs(10),
            nav_timeout: Duration::from_secs(60),
            settle: Duration::from_secs(2),
        }
    }
}

/// Browser-backed executor. The scoped rendering surface of the pipeline:
/// acquired at start, must be released with [`BrowserFetcher::close`].
pub struct BrowserFetcher {
    client: Mutex<Option<Client>>,
    config: BrowserConfig,
    identity: Identity,
    warmed: AtomicBool,
}

impl BrowserFetcher {
    /// Launch a browsing context carrying the given identity.
    pub async fn connect(config: BrowserConfig, identity: Identity) -> ScrapeResult<Self> {
        let mut chrome_opts = serde_json::Map::new();
        chrome_opts.insert("args".into(), json!(identity.browser_args(config.headless)));

        let mut caps = serde_json::Map::new();
        caps.insert("goog:chromeOptions".into(), chrome_opts.into());

        let client = ClientBuilder::rustls()
            .map_err(|err| ScrapeError::Surface(format!("tls init failed: {err}")))?
            .capabilities(caps)
            .connect(&config.webdriver_url)
            .await?;

        log::info!(
            "rendering surface ready at {} (headless={})",
            config.webdriver_url,
            config.headless
        );

        Ok(Self {
            client: Mutex::new(Some(client)),
            config,
            identity,
            warmed: AtomicBool::new(false),
        })
    }

    /// Navigate without extracting markup. Used by the login flow.
    pub async fn navigate(&self, url: &Url) -> ScrapeResult<()> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(ScrapeError::Surface("rendering surface closed".into()))?;
        client.goto(url.as_str()).await?;
        apply_stealth(client).await;
        Ok(())
    }

    /// Current url plus rendered markup, without waiting for readiness.
    /// Used by the login poll loop.
    pub async fn snapshot(&self) -> ScrapeResult<(Url, String)> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(ScrapeError::Surface("rendering surface closed".into()))?;
        let url = client.current_url().await?;
        let body = client.source().await?;
        Ok((url, body))
    }

    /// Capture the context's cookies for the session store.
    pub async fn export_cookies(&self) -> ScrapeResult<Vec<StoredCookie>> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(ScrapeError::Surface("rendering surface closed".into()))?;
        let cookies = client.get_all_cookies().await?;
        Ok(cookies.iter().map(stored_from_webdriver).collect())
    }

    /// Restore persisted cookies into the context. WebDriver only accepts
    /// cookies for the active document's domain, so this navigates to
    /// `base_url` first.
    pub async fn import_cookies(&self, base_url: &Url, cookies: &[StoredCookie]) -> ScrapeResult<()> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(ScrapeError::Surface("rendering surface closed".into()))?;
        client.goto(base_url.as_str()).await?;
        for stored in cookies {
            let mut cookie = Cookie::new(stored.name.clone(), stored.value.clone());
            if let Some(ref domain) = stored.domain {
                cookie.set_domain(domain.clone());
            }
            cookie.set_path(stored.path.clone().unwrap_or_else(|| "/".into()));
            cookie.set_secure(stored.secure);
            cookie.set_http_only(stored.http_only);
            if let Err(err) = client.add_cookie(cookie).await {
                log::debug!("cookie {} rejected by context: {err}", stored.name);
            }
        }
        Ok(())
    }

    /// Release the browsing context. Always call on every exit path; the OS
    /// process behind the context outlives a dropped handle otherwise.
    /// Idempotent, so double-close in a teardown path is harmless.
    pub async fn close(&self) -> ScrapeResult<()> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.take() {
            client.close().await?;
            log::info!("rendering surface closed");
        }
        Ok(())
    }

    async fn warm_up(&self, client: &mut Client) {
        if self.warmed.swap(true, Ordering::SeqCst) {
            return;
        }
        // First navigation goes through a credible upstream so the first
        // on-site request carries a realistic referrer.
        if let Err(err) = client.goto(&self.identity.referrer).await {
            log::debug!("referrer warm-up failed: {err}");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

impl Drop for BrowserFetcher {
    fn drop(&mut self) {
        if let Ok(guard) = self.client.try_lock()
            && guard.is_some()
        {
            log::warn!("rendering surface dropped without close(); browser process may leak");
        }
    }
}

#[async_trait]
impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let mut guard = self.client.lock().await;
        let client = guard
            .as_mut()
            .ok_or_else(|| FetchError::Network("rendering surface closed".into()))?;

        self.warm_up(client).await;

        tokio::time::timeout(self.config.nav_timeout, client.goto(url.as_str()))
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|err| FetchError::Network(err.to_string()))?;

        apply_stealth(client).await;

        let ready = client
            .wait()
            .at_most(self.config.ready_timeout)
            .every(Duration::from_millis(250))
            .for_element(Locator::Css(&self.config.ready_selector))
            .await;
        if ready.is_err() {
            log::debug!(
                "readiness selector `{}` not seen within {:?}, taking source as-is",
                self.config.ready_selector,
                self.config.ready_timeout
            );
        }

        scroll_to_hydrate(client).await;
        if self.config.settle > Duration::ZERO {
            tokio::time::sleep(self.config.settle).await;
        }

        let final_url = client
            .current_url()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;
        let body = client
            .source()
            .await
            .map_err(|err| FetchError::Network(err.to_string()))?;

        if let Some(signal) = classify_block(200, &final_url, &body) {
            return Err(FetchError::Blocked {
                signal,
                url: final_url.to_string(),
            });
        }

        Ok(FetchResponse {
            status: 200,
            headers: HeaderMap::new(),
            body,
            final_url,
        })
    }
}

/// Suppress automation-detectable navigator flags in the current document.
/// Best-effort; a failed injection is not worth failing the fetch over.
async fn apply_stealth(client: &mut Client) {
    if let Err(err) = client.execute(STEALTH_SCRIPT, vec![]).await {
        log::debug!("stealth script injection failed: {err}");
    }
}

/// Nudge lazy-loaded listing entries into the DOM.
async fn scroll_to_hydrate(client: &mut Client) {
    for _ in 0..3 {
        if client
            .execute("window.scrollBy(0, 600);", vec![])
            .await
            .is_err()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
}

fn stored_from_webdriver(cookie: &Cookie<'_>) -> StoredCookie {
    StoredCookie {
        name: cookie.name().to_string(),
        value: cookie.value().to_string(),
        domain: cookie.domain().map(str::to_string),
        path: cookie.path().map(str::to_string),
        secure: cookie.secure().unwrap_or(false),
        http_only: cookie.http_only().unwrap_or(false),
        expires_unix: cookie
            .expires_datetime()
            .map(|expiry| expiry.unix_timestamp()),
    }
}
