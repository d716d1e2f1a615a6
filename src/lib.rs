//! # callscraper-rs
//!
//! Session-backed retrieval of earnings-call transcripts from a
//! login-protected financial site.
//!
//! The pipeline drives two interchangeable fetch strategies (a WebDriver
//! rendering surface and a cookie-seeded HTTP client) behind one retry
//! controller, with an anti-detection identity layer, randomized pacing,
//! block-page classification, and mid-run session re-acquisition.
//! Authentication itself is interactive: the operator signs in once in a
//! visible browser window and the captured cookies persist across runs.
//!
//! ## Features
//!
//! - Persistent session store with interactive login capture
//! - Rendered (WebDriver) and lightweight (direct HTTP) fetch modes
//! - User-agent rotation, stealth browser flags, human-like pacing
//! - Rate-limit backoff, auth-wall recovery, bot-challenge detection
//! - Listing pagination with dedup and early stop
//! - Transcript extraction with paywall detection, participants roster,
//!   and Q&A session splitting
//! - Cooperative cancellation with partial results
//!
//! ## Example
//!
//! ```no_run
//! use callscraper_rs::{FetchMode, TranscriptScraper};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callscraper_rs::ScrapeError> {
//!     let scraper = TranscriptScraper::builder()
//!         .mode(FetchMode::Lightweight)
//!         .max_pages(2)
//!         .start(false)
//!         .await?;
//!
//!     let listing = scraper.latest(None).await?;
//!     for stub in &listing.stubs {
//!         println!("{} ({})", stub.title, stub.ticker.as_deref().unwrap_or("?"));
//!     }
//!
//!     scraper.close().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod extract;
pub mod fetch;
pub mod listing;
pub mod records;
pub mod retry;
pub mod scraper;
pub mod session;
pub mod stealth;

pub use crate::error::{ScrapeError, ScrapeResult};
pub use crate::extract::{SiteRules, SiteRulesConfig, parse_article, parse_listing};
pub use crate::fetch::{
    BlockSignal,
    BrowserConfig,
    BrowserFetcher,
    FetchError,
    FetchResponse,
    Fetcher,
    HttpFetcher,
    SharedFetcher,
    classify_block,
};
pub use crate::listing::{ListingPaginator, Pagination, StopReason};
pub use crate::records::{
    BatchFailure,
    BatchReport,
    DocumentEntry,
    Participant,
    ScrapeDocument,
    TranscriptRecord,
    TranscriptStub,
};
pub use crate::retry::{RetryController, RetryPolicy, SessionRefresher};
pub use crate::scraper::{FetchMode, ScraperBuilder, ScraperConfig, TranscriptScraper};
pub use crate::session::{
    AcquirerConfig,
    SessionAcquirer,
    SessionState,
    SessionStore,
    StoredCookie,
};
pub use crate::stealth::{Identity, Pacer, StealthConfig};

/// Crate version, for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
