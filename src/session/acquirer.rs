//! Session acquisition: probe stored state, or drive the interactive login.
//!
//! The login itself is operator-driven (external authentication in a visible
//! browser window); this component only opens the login page, polls for the
//! post-login signature, and captures the resulting cookies. Credential
//! entry is never automated.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use url::Url;

use crate::error::{ScrapeError, ScrapeResult};
use crate::fetch::{FetchError, Fetcher, HttpFetcher};
use crate::fetch::browser::BrowserFetcher;
use crate::session::{SessionState, SessionStore};
use crate::stealth::Identity;

/// Body markers that only appear for a signed-in user.
static LOGGED_IN_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(
        r#"(data-test-id="user-nav"|data-test-id="user-menu"|"isLoggedIn"\s*:\s*true|Sign Out|My Portfolio)"#,
    )
    .case_insensitive(true)
    .build()
    .expect("invalid logged-in signature regex")
});

/// Acquisition tuning.
#[derive(Debug, Clone)]
pub struct AcquirerConfig {
    pub base_url: Url,
    pub login_url: Url,
    /// Hard deadline for the operator to finish the external login.
    pub login_timeout: Duration,
    pub poll_interval: Duration,
    /// Timeout for the stored-state probe request.
    pub probe_timeout: Duration,
}

impl AcquirerConfig {
    pub fn for_base(base_url: Url) -> ScrapeResult<Self> {
        let login_url = base_url.join("login")?;
        Ok(Self {
            base_url,
            login_url,
            login_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(3),
            probe_timeout: Duration::from_secs(30),
        })
    }
}

/// Produces a valid [`SessionState`], from the store when possible and from
/// an interactive login otherwise.
pub struct SessionAcquirer {
    config: AcquirerConfig,
    store: SessionStore,
    identity: Identity,
}

impl SessionAcquirer {
    pub fn new(config: AcquirerConfig, store: SessionStore, identity: Identity) -> Self {
        Self {
            config,
            store,
            identity,
        }
    }

    /// Restore-and-validate, falling back to the interactive flow.
    ///
    /// With `force` set the stored state is ignored outright. The browser
    /// handle must point at a visible surface when a login may be needed;
    /// the operator cannot complete external authentication headlessly.
    pub async fn acquire(&self, force: bool, browser: &BrowserFetcher) -> ScrapeResult<SessionState> {
        if !force
            && let Some(state) = self.store.load()?
        {
            if state.looks_expired() {
                log::info!("stored session is past its expiry hint, re-authenticating");
            } else if self.probe(&state).await? {
                log::info!("stored session validated");
                return Ok(state);
            } else {
                log::info!("stored session rejected by site, re-authenticating");
            }
        }

        self.login_interactive(browser).await
    }

    /// Lightweight authenticated probe against the site root.
    async fn probe(&self, state: &SessionState) -> ScrapeResult<bool> {
        let fetcher = HttpFetcher::new(
            &self.identity,
            Some(state),
            &self.config.base_url,
            self.config.probe_timeout,
        )?;

        match fetcher.fetch(&self.config.base_url).await {
            Ok(response) => Ok(LOGGED_IN_RE.is_match(&response.body)),
            // Any block on the probe means the state is not usable as-is.
            Err(FetchError::Blocked { .. }) => Ok(false),
            Err(err) => {
                log::warn!("session probe failed: {err}");
                Ok(false)
            }
        }
    }

    /// Open the login page and wait for the operator to finish, detected by
    /// the url leaving `/login` and the logged-in body signature appearing.
    async fn login_interactive(&self, browser: &BrowserFetcher) -> ScrapeResult<SessionState> {
        log::info!(
            "interactive login required; complete authentication in the browser window (timeout {:?})",
            self.config.login_timeout
        );
        browser.navigate(&self.config.login_url).await?;

        let deadline = tokio::time::Instant::now() + self.config.login_timeout;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            if tokio::time::Instant::now() >= deadline {
                return Err(ScrapeError::LoginTimeout {
                    timeout_secs: self.config.login_timeout.as_secs(),
                });
            }

            let (url, body) = browser.snapshot().await?;
            let on_site = url.host_str() == self.config.base_url.host_str();
            if on_site && !url.path().starts_with("/login") && LOGGED_IN_RE.is_match(&body) {
                break;
            }
        }

        let cookies = browser.export_cookies().await?;
        let state = SessionState::new(cookies);
        self.store.save(&state)?;
        log::info!("login complete, session captured");
        Ok(state)
    }
}
