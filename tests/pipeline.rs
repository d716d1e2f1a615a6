//! End-to-end pipeline behavior against scripted fetchers: pagination,
//! retry classification, backoff shape, and cancellation. No network and no
//! browser; the fetch seam is the [`Fetcher`] trait.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use std::sync::Arc;

use callscraper_rs::{
    BlockSignal, FetchError, FetchResponse, Fetcher, ListingPaginator, Pacer, RetryController,
    RetryPolicy, ScrapeError, ScrapeResult, SessionRefresher, SharedFetcher, SiteRules,
    SiteRulesConfig, StopReason,
};

fn base_url() -> Url {
    Url::parse("https://example.com/earnings/earnings-call-transcripts").unwrap()
}

fn rules() -> SiteRules {
    SiteRules::compile(&SiteRulesConfig::default()).unwrap()
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        rate_limit_attempts: 3,
        backoff_base: Duration::from_millis(100),
        backoff_cap: Duration::from_secs(5),
        backoff_jitter: Duration::ZERO,
        transient_attempts: 2,
        transient_delay: Duration::from_millis(10),
    }
}

fn response(url: &Url, status: u16, body: &str) -> FetchResponse {
    FetchResponse {
        status,
        headers: HeaderMap::new(),
        body: body.to_string(),
        final_url: url.clone(),
    }
}

fn listing_html(items: &[(&str, &str)]) -> String {
    let mut html = String::from("<html><body>");
    for (title, href) in items {
        html.push_str(&format!(
            r#"<article data-test-id="post-list-item">
                <a data-test-id="post-list-item-title" href="{href}">{title}</a>
            </article>"#
        ));
    }
    html.push_str("</body></html>");
    html
}

/// Serves fixed bodies keyed by full url; anything unknown is an empty page.
struct PageFetcher {
    pages: HashMap<String, String>,
    calls: AtomicU32,
}

impl PageFetcher {
    fn new(pages: Vec<(Url, String)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, body)| (url.to_string(), body))
                .collect(),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Fetcher for PageFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self.pages.get(url.as_str()).cloned().unwrap_or_else(|| {
            "<html><body></body></html>".to_string()
        });
        Ok(response(url, 200, &body))
    }
}

/// Replays a scripted sequence of outcomes regardless of url.
struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<FetchResponse, FetchError>>>,
    calls: AtomicU32,
}

impl ScriptedFetcher {
    fn new(script: Vec<Result<FetchResponse, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(response(url, 200, "<html><body>ok</body></html>")))
    }
}

struct CountingRefresher {
    count: AtomicU32,
}

impl CountingRefresher {
    fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl SessionRefresher for CountingRefresher {
    async fn refresh(&self) -> ScrapeResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn page_url(page: u32) -> Url {
    if page <= 1 {
        return base_url();
    }
    let mut url = base_url();
    url.query_pairs_mut().append_pair("page", &page.to_string());
    url
}

fn controller(policy: RetryPolicy) -> RetryController {
    RetryController::new(policy, None, CancellationToken::new())
}

fn idle_pacer() -> Pacer {
    Pacer::new(Duration::ZERO, Duration::ZERO)
}

#[tokio::test]
async fn pagination_collects_in_order_and_dedups() {
    let fetcher = PageFetcher::new(vec![
        (
            page_url(1),
            listing_html(&[
                ("Apple Inc. (AAPL) Q3 2026 Earnings Call Transcript", "/article/1"),
                ("Beta Corp. (BETA) Q2 2026 Earnings Call Transcript", "/article/2"),
            ]),
        ),
        (
            page_url(2),
            listing_html(&[
                // Overlaps with page 1; must not duplicate.
                ("Beta Corp. (BETA) Q2 2026 Earnings Call Transcript", "/article/2"),
                ("Gamma Ltd. (GAMA) Q1 2026 Earnings Call Transcript", "/article/3"),
            ]),
        ),
    ]);
    let retry = controller(quick_policy());
    let pacer = idle_pacer();
    let rules = rules();
    let paginator = ListingPaginator::new(
        &fetcher,
        &retry,
        &pacer,
        &rules,
        CancellationToken::new(),
        base_url(),
    );

    let result = paginator.collect(2).await.unwrap();
    assert_eq!(result.stopped, StopReason::PageLimit);
    assert_eq!(result.pages_fetched, 2);
    let urls: Vec<&str> = result.stubs.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(
        urls,
        [
            "https://example.com/article/1",
            "https://example.com/article/2",
            "https://example.com/article/3",
        ]
    );
    assert_eq!(result.stubs[0].page, 1);
    assert_eq!(result.stubs[2].page, 2);
}

#[tokio::test]
async fn pagination_stops_at_first_empty_page() {
    let fetcher = PageFetcher::new(vec![
        (
            page_url(1),
            listing_html(&[("Apple Inc. (AAPL) Q3 2026 Earnings Call Transcript", "/article/1")]),
        ),
        (
            page_url(2),
            listing_html(&[("Beta Corp. (BETA) Q2 2026 Earnings Call Transcript", "/article/2")]),
        ),
        // Page 3 missing from the map, so it comes back empty.
    ]);
    let retry = controller(quick_policy());
    let pacer = idle_pacer();
    let rules = rules();
    let paginator = ListingPaginator::new(
        &fetcher,
        &retry,
        &pacer,
        &rules,
        CancellationToken::new(),
        base_url(),
    );

    let result = paginator.collect(5).await.unwrap();
    assert_eq!(result.stopped, StopReason::EmptyPage);
    assert_eq!(result.pages_fetched, 3);
    assert_eq!(result.stubs.len(), 2);
    // Pages 4 and 5 were never requested.
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn pagination_stops_when_a_page_repeats() {
    let first = listing_html(&[
        ("Apple Inc. (AAPL) Q3 2026 Earnings Call Transcript", "/article/1"),
        ("Beta Corp. (BETA) Q2 2026 Earnings Call Transcript", "/article/2"),
    ]);
    // The site serves the same tail page for every number past the end.
    let fetcher = PageFetcher::new(vec![(page_url(1), first.clone()), (page_url(2), first)]);
    let retry = controller(quick_policy());
    let pacer = idle_pacer();
    let rules = rules();
    let paginator = ListingPaginator::new(
        &fetcher,
        &retry,
        &pacer,
        &rules,
        CancellationToken::new(),
        base_url(),
    );

    let result = paginator.collect(10).await.unwrap();
    assert_eq!(result.stopped, StopReason::RepeatedPage);
    assert_eq!(result.pages_fetched, 2);
    assert_eq!(result.stubs.len(), 2);
}

/// Cancels its token while serving the first page, so the walk ends before
/// page 2.
struct CancelAfterFirst {
    token: CancellationToken,
    body: String,
}

#[async_trait]
impl Fetcher for CancelAfterFirst {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        self.token.cancel();
        Ok(response(url, 200, &self.body))
    }
}

#[tokio::test]
async fn pagination_cancellation_returns_partial_results() {
    let token = CancellationToken::new();
    let fetcher = CancelAfterFirst {
        token: token.clone(),
        body: listing_html(&[
            ("Apple Inc. (AAPL) Q3 2026 Earnings Call Transcript", "/article/1"),
        ]),
    };
    let retry = RetryController::new(quick_policy(), None, token.clone());
    let pacer = idle_pacer();
    let rules = rules();
    let paginator = ListingPaginator::new(&fetcher, &retry, &pacer, &rules, token, base_url());

    let result = paginator.collect(5).await.unwrap();
    assert_eq!(result.stopped, StopReason::Cancelled);
    assert_eq!(result.pages_fetched, 1);
    assert_eq!(result.stubs.len(), 1);
}

fn rate_limited(url: &Url) -> Result<FetchResponse, FetchError> {
    Err(FetchError::Blocked {
        signal: BlockSignal::RateLimited,
        url: url.to_string(),
    })
}

#[tokio::test(start_paused = true)]
async fn rate_limit_backs_off_then_succeeds() {
    let url = base_url();
    let fetcher = ScriptedFetcher::new(vec![
        rate_limited(&url),
        rate_limited(&url),
        rate_limited(&url),
        Ok(response(&url, 200, "<html><body>fine now</body></html>")),
    ]);
    let retry = controller(quick_policy());

    let start = tokio::time::Instant::now();
    let result = retry.fetch(&fetcher, &url).await.unwrap();
    assert_eq!(result.status, 200);
    assert_eq!(fetcher.calls(), 4);
    // Doubling backoff: 100ms, then 200ms, then 400ms.
    assert!(start.elapsed() >= Duration::from_millis(700));
}

#[tokio::test(start_paused = true)]
async fn rate_limit_exhaustion_is_terminal() {
    let url = base_url();
    let fetcher = ScriptedFetcher::new(vec![
        rate_limited(&url),
        rate_limited(&url),
        rate_limited(&url),
        rate_limited(&url),
        rate_limited(&url),
    ]);
    let retry = controller(quick_policy());

    let err = retry.fetch(&fetcher, &url).await.unwrap_err();
    assert!(matches!(err, ScrapeError::RateLimited { attempts: 4, .. }));
    // Three backed-off retries after the first hit, nothing more.
    assert_eq!(fetcher.calls(), 4);
}

#[tokio::test]
async fn auth_wall_triggers_one_refresh_then_replays() {
    let url = base_url();
    let fetcher = ScriptedFetcher::new(vec![
        Err(FetchError::Blocked {
            signal: BlockSignal::AuthRequired,
            url: url.to_string(),
        }),
        Ok(response(&url, 200, "<html><body>welcome back</body></html>")),
    ]);
    let refresher = std::sync::Arc::new(CountingRefresher::new());
    let retry = RetryController::new(
        quick_policy(),
        Some(refresher.clone()),
        CancellationToken::new(),
    );

    let result = retry.fetch(&fetcher, &url).await.unwrap();
    assert_eq!(result.status, 200);
    assert_eq!(refresher.count.load(Ordering::SeqCst), 1);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn persistent_auth_wall_is_session_expired() {
    let url = base_url();
    let auth_block = || {
        Err(FetchError::Blocked {
            signal: BlockSignal::AuthRequired,
            url: url.to_string(),
        })
    };
    let fetcher = ScriptedFetcher::new(vec![auth_block(), auth_block()]);
    let refresher = std::sync::Arc::new(CountingRefresher::new());
    let retry = RetryController::new(
        quick_policy(),
        Some(refresher.clone()),
        CancellationToken::new(),
    );

    let err = retry.fetch(&fetcher, &url).await.unwrap_err();
    assert!(matches!(err, ScrapeError::SessionExpired { .. }));
    // Refresh happens exactly once; a second wall means the session is gone.
    assert_eq!(refresher.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn auth_wall_without_refresher_is_session_expired() {
    let url = base_url();
    let fetcher = ScriptedFetcher::new(vec![Err(FetchError::Blocked {
        signal: BlockSignal::AuthRequired,
        url: url.to_string(),
    })]);
    let retry = controller(quick_policy());

    let err = retry.fetch(&fetcher, &url).await.unwrap_err();
    assert!(matches!(err, ScrapeError::SessionExpired { .. }));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn network_failures_exhaust_into_fetch_failed() {
    let url = base_url();
    let fetcher = ScriptedFetcher::new(vec![
        Err(FetchError::Network("connection reset".into())),
        Err(FetchError::Network("connection reset".into())),
        Err(FetchError::Timeout),
    ]);
    let retry = controller(quick_policy());

    let err = retry.fetch(&fetcher, &url).await.unwrap_err();
    match err {
        ScrapeError::FetchFailed {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("timed out"));
        }
        other => panic!("expected FetchFailed, got {other:?}"),
    }
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_within_budget() {
    let url = base_url();
    let fetcher = ScriptedFetcher::new(vec![
        Err(FetchError::Timeout),
        Ok(response(&url, 200, "<html><body>recovered</body></html>")),
    ]);
    let retry = controller(quick_policy());

    let result = retry.fetch(&fetcher, &url).await.unwrap();
    assert_eq!(result.status, 200);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn unexpected_status_fails_without_retry() {
    let url = base_url();
    let fetcher = ScriptedFetcher::new(vec![Ok(response(&url, 500, "<html>oops</html>"))]);
    let retry = controller(quick_policy());

    let err = retry.fetch(&fetcher, &url).await.unwrap_err();
    assert!(matches!(err, ScrapeError::UnexpectedStatus { status: 500, .. }));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn challenge_block_fails_without_retry() {
    let url = base_url();
    let fetcher = ScriptedFetcher::new(vec![Err(FetchError::Blocked {
        signal: BlockSignal::Challenge,
        url: url.to_string(),
    })]);
    let retry = controller(quick_policy());

    let err = retry.fetch(&fetcher, &url).await.unwrap_err();
    assert!(matches!(err, ScrapeError::Blocked { .. }));
    assert_eq!(fetcher.calls(), 1);
}

/// Cancels its token, then reports a rate limit. The controller must notice
/// the cancellation instead of sleeping out the backoff.
struct CancelThenRateLimit {
    token: CancellationToken,
}

#[async_trait]
impl Fetcher for CancelThenRateLimit {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        self.token.cancel();
        Err(FetchError::Blocked {
            signal: BlockSignal::RateLimited,
            url: url.to_string(),
        })
    }
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let token = CancellationToken::new();
    let fetcher = CancelThenRateLimit {
        token: token.clone(),
    };
    let retry = RetryController::new(quick_policy(), None, token);

    let err = retry.fetch(&fetcher, &base_url()).await.unwrap_err();
    assert!(matches!(err, ScrapeError::Cancelled));
}

/// Always behind the authentication wall.
struct AuthWalled;

#[async_trait]
impl Fetcher for AuthWalled {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        Err(FetchError::Blocked {
            signal: BlockSignal::AuthRequired,
            url: url.to_string(),
        })
    }
}

/// Always succeeds; stands in for a client rebuilt with fresh cookies.
struct FreshClient;

#[async_trait]
impl Fetcher for FreshClient {
    async fn fetch(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        Ok(response(url, 200, "<html><body>signed in</body></html>"))
    }
}

/// Refresher that swaps the live seam over to a rebuilt client, the way a
/// real session re-acquisition replaces the cookie-seeded HTTP client.
struct SwappingRefresher {
    seam: Arc<SharedFetcher>,
    count: AtomicU32,
}

#[async_trait]
impl SessionRefresher for SwappingRefresher {
    async fn refresh(&self) -> ScrapeResult<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.seam.swap(Arc::new(FreshClient)).await;
        Ok(())
    }
}

#[tokio::test]
async fn refresh_swaps_the_live_client_for_the_replay() {
    let url = base_url();
    // The original client is expired; only the swapped-in one can succeed,
    // so a passing replay proves it went through the refreshed seam.
    let seam = Arc::new(SharedFetcher::new(Arc::new(AuthWalled)));
    let refresher = Arc::new(SwappingRefresher {
        seam: seam.clone(),
        count: AtomicU32::new(0),
    });
    let retry = RetryController::new(
        quick_policy(),
        Some(refresher.clone()),
        CancellationToken::new(),
    );

    let result = retry.fetch(seam.as_ref(), &url).await.unwrap();
    assert_eq!(result.status, 200);
    assert_eq!(refresher.count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn pagination_paces_every_page_including_the_first() {
    let fetcher = PageFetcher::new(vec![(
        page_url(1),
        listing_html(&[("Apple Inc. (AAPL) Q3 2026 Earnings Call Transcript", "/article/1")]),
    )]);
    let retry = controller(quick_policy());
    let pacer = Pacer::new(Duration::from_millis(200), Duration::from_millis(200));
    let rules = rules();
    let paginator = ListingPaginator::new(
        &fetcher,
        &retry,
        &pacer,
        &rules,
        CancellationToken::new(),
        base_url(),
    );

    let start = tokio::time::Instant::now();
    let result = paginator.collect(1).await.unwrap();
    assert_eq!(result.stubs.len(), 1);
    assert!(start.elapsed() >= Duration::from_millis(200));
}
