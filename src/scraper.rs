//! Pipeline facade: configuration, session lifecycle, and the high-level
//! operations (latest listings, ticker search, single transcript, batch).
//!
//! A scraper is built from a [`ScraperConfig`], started with
//! [`TranscriptScraper::start`] (which acquires the session and the
//! rendering surface) and released with [`TranscriptScraper::close`]. All
//! operations in between go through one retry controller and one pacer so
//! the whole run presents a single, human-looking client to the site.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{ScrapeError, ScrapeResult};
use crate::extract::{SiteRules, SiteRulesConfig, parse_article, parse_listing};
use crate::fetch::{BrowserConfig, BrowserFetcher, Fetcher, HttpFetcher, SharedFetcher};
use crate::listing::{ListingPaginator, Pagination};
use crate::records::{BatchFailure, BatchReport, ScrapeDocument, TranscriptRecord, TranscriptStub};
use crate::retry::{RetryController, RetryPolicy, SessionRefresher};
use crate::session::{AcquirerConfig, SessionAcquirer, SessionState, SessionStore};
use crate::stealth::{Identity, Pacer, StealthConfig};

const DEFAULT_BASE_URL: &str = "https://seekingalpha.com";
const LISTING_PATH: &str = "earnings/earnings-call-transcripts";

/// Which retrieval strategy drives the pipeline's page fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Full rendering through the WebDriver surface. Slower, survives
    /// client-rendered markup, and batches run sequentially.
    #[default]
    Rendered,
    /// Direct HTTP with session cookies. Faster and batch-parallel, but
    /// only sees server-rendered markup.
    Lightweight,
}

/// Complete pipeline configuration.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: Url,
    pub mode: FetchMode,
    /// Default listing depth for [`TranscriptScraper::latest`].
    pub max_pages: u32,
    /// Batch parallelism in lightweight mode, clamped to `1..=3`. Rendered
    /// mode always runs batches sequentially.
    pub batch_workers: usize,
    pub http_timeout: Duration,
    pub stealth: StealthConfig,
    pub browser: BrowserConfig,
    pub retry: RetryPolicy,
    pub rules: SiteRulesConfig,
    /// Session state directory; `None` means the user-scoped default.
    pub session_dir: Option<PathBuf>,
    pub login_timeout: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            mode: FetchMode::default(),
            max_pages: 3,
            batch_workers: 3,
            http_timeout: Duration::from_secs(30),
            stealth: StealthConfig::default(),
            // The operator must be able to see the login window.
            browser: BrowserConfig {
                headless: false,
                ..BrowserConfig::default()
            },
            retry: RetryPolicy::default(),
            rules: SiteRulesConfig::default(),
            session_dir: None,
            login_timeout: Duration::from_secs(300),
        }
    }
}

/// Fluent construction for [`TranscriptScraper`].
#[derive(Debug, Default)]
pub struct ScraperBuilder {
    config: ScraperConfig,
}

impl ScraperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, base_url: Url) -> Self {
        self.config.base_url = base_url;
        self
    }

    pub fn mode(mut self, mode: FetchMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_pages(mut self, max_pages: u32) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn batch_workers(mut self, workers: usize) -> Self {
        self.config.batch_workers = workers;
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout = timeout;
        self
    }

    pub fn stealth(mut self, stealth: StealthConfig) -> Self {
        self.config.stealth = stealth;
        self
    }

    pub fn browser(mut self, browser: BrowserConfig) -> Self {
        self.config.browser = browser;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn rules(mut self, rules: SiteRulesConfig) -> Self {
        self.config.rules = rules;
        self
    }

    pub fn session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.session_dir = Some(dir.into());
        self
    }

    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.config.login_timeout = timeout;
        self
    }

    pub fn config(self) -> ScraperConfig {
        self.config
    }

    /// Build and start the pipeline. See [`TranscriptScraper::start`].
    pub async fn start(self, force_login: bool) -> ScrapeResult<TranscriptScraper> {
        TranscriptScraper::start(self.config, force_login).await
    }
}

/// Shared session-bearing state: the rendering surface, the cookie-seeded
/// HTTP client, and the acquirer that can replace both. This is what the
/// retry controller calls back into when the site demands authentication
/// mid-run.
struct SessionRuntime {
    acquirer: SessionAcquirer,
    browser: Arc<BrowserFetcher>,
    /// Lightweight seam; swapped (not mutated) on refresh so in-flight
    /// retries see the rebuilt client on their next attempt.
    http: Arc<SharedFetcher>,
    state: RwLock<SessionState>,
    identity: Identity,
    base_url: Url,
    http_timeout: Duration,
}

impl SessionRuntime {
    async fn install(&self, state: SessionState) -> ScrapeResult<()> {
        let http = HttpFetcher::new(
            &self.identity,
            Some(&state),
            &self.base_url,
            self.http_timeout,
        )?;
        self.browser
            .import_cookies(&self.base_url, &state.cookies)
            .await?;
        self.http.swap(Arc::new(http)).await;
        *self.state.write().await = state;
        Ok(())
    }
}

#[async_trait]
impl SessionRefresher for SessionRuntime {
    async fn refresh(&self) -> ScrapeResult<()> {
        // The stored state just failed against the live site, so skip the
        // probe and go straight to the interactive flow.
        let state = self.acquirer.acquire(true, &self.browser).await?;
        self.install(state).await
    }
}

/// The assembled pipeline.
pub struct TranscriptScraper {
    config: ScraperConfig,
    rules: Arc<SiteRules>,
    pacer: Pacer,
    cancel: CancellationToken,
    runtime: Arc<SessionRuntime>,
    retry: RetryController,
    store: SessionStore,
    listing_url: Url,
}

impl TranscriptScraper {
    pub fn builder() -> ScraperBuilder {
        ScraperBuilder::new()
    }

    /// Acquire the rendering surface and a valid session, then return a
    /// ready pipeline. With `force_login` the stored session is discarded
    /// and the interactive flow runs unconditionally.
    pub async fn start(config: ScraperConfig, force_login: bool) -> ScrapeResult<Self> {
        let rules = Arc::new(SiteRules::compile(&config.rules)?);
        let identity = Identity::sample(&config.stealth);
        let pacer = Pacer::from_config(&config.stealth);
        let listing_url = config.base_url.join(LISTING_PATH)?;

        let store = match &config.session_dir {
            Some(dir) => SessionStore::new(dir),
            None => SessionStore::default_location(),
        };

        let browser = Arc::new(
            BrowserFetcher::connect(config.browser.clone(), identity.clone()).await?,
        );

        let mut acquirer_config = AcquirerConfig::for_base(config.base_url.clone())?;
        acquirer_config.login_timeout = config.login_timeout;
        let acquirer = SessionAcquirer::new(acquirer_config, store.clone(), identity.clone());

        let state = match acquirer.acquire(force_login, &browser).await {
            Ok(state) => state,
            Err(err) => {
                // Do not leak the browser process on a failed login.
                if let Err(close_err) = browser.close().await {
                    log::warn!("surface teardown after failed login also failed: {close_err}");
                }
                return Err(err);
            }
        };

        let http = HttpFetcher::new(&identity, Some(&state), &config.base_url, config.http_timeout)?;
        browser.import_cookies(&config.base_url, &state.cookies).await?;

        let runtime = Arc::new(SessionRuntime {
            acquirer,
            browser,
            http: Arc::new(SharedFetcher::new(Arc::new(http))),
            state: RwLock::new(state),
            identity,
            base_url: config.base_url.clone(),
            http_timeout: config.http_timeout,
        });

        let cancel = CancellationToken::new();
        let retry = RetryController::new(
            config.retry.clone(),
            Some(runtime.clone() as Arc<dyn SessionRefresher>),
            cancel.clone(),
        );

        Ok(Self {
            config,
            rules,
            pacer,
            cancel,
            runtime,
            retry,
            store,
            listing_url,
        })
    }

    /// Token callers can clone and cancel to stop the run at the next
    /// suspension point. In-flight page fetches finish; partial results are
    /// returned where the operation supports them.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn fetcher(&self) -> Arc<dyn Fetcher> {
        match self.config.mode {
            FetchMode::Rendered => self.runtime.browser.clone(),
            // The shared seam, not a snapshot of the current client; a
            // session refresh must be visible to the retry replay.
            FetchMode::Lightweight => self.runtime.http.clone(),
        }
    }

    /// Walk the transcript listing for up to `max_pages` pages (the
    /// configured default when `None`).
    pub async fn latest(&self, max_pages: Option<u32>) -> ScrapeResult<Pagination> {
        let pages = max_pages.unwrap_or(self.config.max_pages);
        let fetcher = self.fetcher();
        let paginator = ListingPaginator::new(
            fetcher.as_ref(),
            &self.retry,
            &self.pacer,
            &self.rules,
            self.cancel.clone(),
            self.listing_url.clone(),
        );
        paginator.collect(pages).await
    }

    /// Listing walk packaged as the serializable output document.
    pub async fn latest_document(&self, max_pages: Option<u32>) -> ScrapeResult<ScrapeDocument> {
        let pagination = self.latest(max_pages).await?;
        Ok(ScrapeDocument::from_stubs(pagination.stubs))
    }

    /// Find the most recent transcript stub for a ticker via site search.
    /// `Ok(None)` means the search genuinely returned no transcript.
    pub async fn search(&self, ticker: &str) -> ScrapeResult<Option<TranscriptStub>> {
        let fetcher = self.fetcher();
        search_ticker(
            fetcher.as_ref(),
            &self.retry,
            &self.pacer,
            &self.rules,
            &self.config.base_url,
            ticker,
        )
        .await
    }

    /// Fetch one full transcript. `target` is either a ticker symbol or an
    /// article url; tickers resolve through [`TranscriptScraper::search`].
    pub async fn transcript(&self, target: &str) -> ScrapeResult<Option<TranscriptRecord>> {
        let fetcher = self.fetcher();
        transcript_for_target(
            fetcher.as_ref(),
            &self.retry,
            &self.pacer,
            &self.rules,
            &self.config.base_url,
            target,
        )
        .await
    }

    /// Fetch the full article behind a listing stub.
    pub async fn fetch_stub(&self, stub: &TranscriptStub) -> ScrapeResult<TranscriptRecord> {
        let fetcher = self.fetcher();
        fetch_article(
            fetcher.as_ref(),
            &self.retry,
            &self.pacer,
            &self.rules,
            &stub.url,
        )
        .await
    }

    /// Fetch transcripts for many tickers, partitioning outcomes instead of
    /// failing the whole batch. Only session-level errors (expiry, login
    /// timeout, cancellation) abort early; the report then covers the
    /// tickers processed before the abort and marks the rest failed.
    pub async fn batch(&self, tickers: &[String]) -> ScrapeResult<BatchReport> {
        let workers = match self.config.mode {
            // One rendering surface, so one lane.
            FetchMode::Rendered => 1,
            FetchMode::Lightweight => self.config.batch_workers.clamp(1, 3),
        };

        if workers == 1 {
            return self.batch_sequential(tickers).await;
        }
        self.batch_parallel(tickers, workers).await
    }

    async fn batch_sequential(&self, tickers: &[String]) -> ScrapeResult<BatchReport> {
        let fetcher = self.fetcher();
        let mut report = BatchReport::default();

        for (index, ticker) in tickers.iter().enumerate() {
            if self.cancel.is_cancelled() {
                mark_unprocessed(&mut report, &tickers[index..], "cancelled");
                break;
            }
            let outcome = transcript_for_target(
                fetcher.as_ref(),
                &self.retry,
                &self.pacer,
                &self.rules,
                &self.config.base_url,
                ticker,
            )
            .await;
            if let Some(fatal) = file_outcome(&mut report, ticker, outcome) {
                mark_unprocessed(&mut report, &tickers[index + 1..], &fatal);
                break;
            }
        }

        log_batch(&report);
        Ok(report)
    }

    async fn batch_parallel(&self, tickers: &[String], workers: usize) -> ScrapeResult<BatchReport> {
        let queue = Arc::new(tokio::sync::Mutex::new(
            tickers.iter().cloned().collect::<VecDeque<_>>(),
        ));
        let report = Arc::new(tokio::sync::Mutex::new(BatchReport::default()));
        let state = self.runtime.state.read().await.clone();

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            // Each lane gets its own fingerprint and client so parallel
            // requests do not share one suspicious identity.
            let identity = Identity::sample(&self.config.stealth);
            let fetcher = Arc::new(HttpFetcher::new(
                &identity,
                Some(&state),
                &self.config.base_url,
                self.config.http_timeout,
            )?);
            // Workers carry no refresher; concurrent interactive logins
            // make no sense, so an auth wall here is terminal for the lane.
            let retry = RetryController::new(self.config.retry.clone(), None, self.cancel.clone());
            let pacer = Pacer::from_config(&self.config.stealth);
            let rules = self.rules.clone();
            let base_url = self.config.base_url.clone();
            let queue = queue.clone();
            let report = report.clone();
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(ticker) = queue.lock().await.pop_front() else {
                        break;
                    };
                    log::debug!("worker {worker} picked up {ticker}");
                    let outcome = transcript_for_target(
                        fetcher.as_ref(),
                        &retry,
                        &pacer,
                        &rules,
                        &base_url,
                        &ticker,
                    )
                    .await;
                    let fatal = file_outcome(&mut *report.lock().await, &ticker, outcome);
                    if let Some(fatal) = fatal {
                        // Drain the queue so unprocessed tickers are
                        // accounted for, and stop every lane.
                        let remaining: Vec<String> = queue.lock().await.drain(..).collect();
                        mark_unprocessed(&mut *report.lock().await, &remaining, &fatal);
                        break;
                    }
                }
            }));
        }

        for handle in handles {
            if let Err(err) = handle.await {
                log::error!("batch worker panicked: {err}");
            }
        }

        let report = Arc::try_unwrap(report)
            .map_err(|_| ScrapeError::Parse("batch report still shared after join".into()))?
            .into_inner();
        log_batch(&report);
        Ok(report)
    }

    /// Remove the persisted session state. The in-memory session stays
    /// valid until the pipeline is restarted.
    pub fn clear_session(&self) -> ScrapeResult<()> {
        self.store.clear()?;
        Ok(())
    }

    /// Release the rendering surface. Call on every exit path.
    pub async fn close(self) -> ScrapeResult<()> {
        self.runtime.browser.close().await
    }
}

/// Classify one per-ticker outcome into the report. Returns the error
/// message when the error is fatal to the whole batch.
fn file_outcome(
    report: &mut BatchReport,
    ticker: &str,
    outcome: ScrapeResult<Option<TranscriptRecord>>,
) -> Option<String> {
    match outcome {
        Ok(Some(record)) if record.is_paywalled => report.paywalled.push(record),
        Ok(Some(record)) => report.fetched.push(record),
        Ok(None) => report.not_found.push(ticker.to_string()),
        Err(err) => {
            let message = err.to_string();
            report.failed.push(BatchFailure {
                ticker: ticker.to_string(),
                error: message.clone(),
            });
            if err.is_fatal() {
                return Some(message);
            }
        }
    }
    None
}

fn mark_unprocessed(report: &mut BatchReport, tickers: &[impl AsRef<str>], reason: &str) {
    for ticker in tickers {
        report.failed.push(BatchFailure {
            ticker: ticker.as_ref().to_string(),
            error: format!("not attempted: {reason}"),
        });
    }
}

fn log_batch(report: &BatchReport) {
    log::info!(
        "batch done: {} fetched, {} paywalled, {} not found, {} failed",
        report.fetched.len(),
        report.paywalled.len(),
        report.not_found.len(),
        report.failed.len()
    );
}

/// Site search url for one ticker's transcripts.
fn search_url(base_url: &Url, ticker: &str) -> ScrapeResult<Url> {
    let mut url = base_url.join("search")?;
    url.query_pairs_mut()
        .append_pair("q", &format!("{ticker} earnings call transcript"))
        .append_pair("tab", "transcripts");
    Ok(url)
}

/// Search for the most recent transcript stub for a ticker.
///
/// Results are listing-shaped, so the listing extractor applies. A stub
/// whose ticker matches exactly wins; otherwise the first transcript-shaped
/// result stands in, since search ranks by relevance.
async fn search_ticker(
    fetcher: &dyn Fetcher,
    retry: &RetryController,
    pacer: &Pacer,
    rules: &SiteRules,
    base_url: &Url,
    ticker: &str,
) -> ScrapeResult<Option<TranscriptStub>> {
    let ticker = ticker.trim().to_uppercase();
    let url = search_url(base_url, &ticker)?;
    pacer.pace().await;
    let response = retry.fetch(fetcher, &url).await?;

    let stubs = parse_listing(&response.body, rules, base_url, 1);
    if stubs.is_empty() {
        log::info!("no transcript found for {ticker}");
        return Ok(None);
    }

    let exact = stubs
        .iter()
        .find(|stub| stub.ticker.as_deref() == Some(ticker.as_str()))
        .cloned();
    Ok(exact.or_else(|| stubs.into_iter().next()))
}

/// Fetch and extract one transcript article.
async fn fetch_article(
    fetcher: &dyn Fetcher,
    retry: &RetryController,
    pacer: &Pacer,
    rules: &SiteRules,
    url: &Url,
) -> ScrapeResult<TranscriptRecord> {
    pacer.pace().await;
    let response = retry.fetch(fetcher, url).await?;
    Ok(parse_article(&response.body, &response.final_url, rules))
}

/// Resolve a ticker-or-url target to a full transcript record.
async fn transcript_for_target(
    fetcher: &dyn Fetcher,
    retry: &RetryController,
    pacer: &Pacer,
    rules: &SiteRules,
    base_url: &Url,
    target: &str,
) -> ScrapeResult<Option<TranscriptRecord>> {
    let article_url = match Url::parse(target) {
        Ok(url) => Some(url),
        Err(_) => search_ticker(fetcher, retry, pacer, rules, base_url, target)
            .await?
            .map(|stub| stub.url),
    };

    let Some(url) = article_url else {
        return Ok(None);
    };

    let record = fetch_article(fetcher, retry, pacer, rules, &url).await?;
    Ok(Some(record))
}
