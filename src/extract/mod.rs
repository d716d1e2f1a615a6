//! HTML extraction: listing pages and transcript articles.
//!
//! All selectors live in [`SiteRulesConfig`] so a site markup change is a
//! configuration edit, not a code change. Extraction is lenient throughout:
//! a missing title or timestamp degrades the record, it never fails the
//! operation.

pub mod article;
pub mod listing;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Selector;

use crate::error::{ScrapeError, ScrapeResult};

pub use article::parse_article;
pub use listing::parse_listing;

/// Ticker in the `Company Name (TICK)` form used by listing titles.
static PAREN_TICKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([A-Z]{1,5})\)").expect("invalid parenthesized ticker regex"));

/// Ticker in the `TICK: Company` / `TICK - Company` prefix forms.
static PREFIX_TICKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]{1,5})\s*[:\-]\s").expect("invalid prefix ticker regex"));

/// Selector strings, serde-friendly.
#[derive(Debug, Clone)]
pub struct SiteRulesConfig {
    pub listing_item: String,
    pub listing_title: String,
    pub listing_time: String,
    pub listing_ticker: String,
    /// Substring an anchor's href must contain for the anchor-scan fallback.
    pub transcript_href_marker: String,
    pub article_title: String,
    pub article_time: String,
    pub article_body: String,
    pub article_paragraph: String,
    pub paywall_marker: String,
    /// Preview container shown on gated articles; takes precedence over the
    /// full body when the paywall marker is present.
    pub paywall_preview: String,
}

impl Default for SiteRulesConfig {
    fn default() -> Self {
        Self {
            listing_item: r#"article[data-test-id="post-list-item"]"#.into(),
            listing_title: r#"a[data-test-id="post-list-item-title"]"#.into(),
            listing_time: "time".into(),
            listing_ticker: r#"[data-test-id="post-list-item-ticker"]"#.into(),
            transcript_href_marker: "earnings-call-transcript".into(),
            article_title: r#"h1, [data-test-id="article-title"]"#.into(),
            article_time: "time".into(),
            article_body: r#"div[data-test-id="article-body"], div[data-test-id="content-container"]"#
                .into(),
            article_paragraph: "p".into(),
            paywall_marker: r#"[data-test-id="paywall"], .paywall-message, [data-test-id="paywall-container"]"#
                .into(),
            paywall_preview: r#"[data-test-id="paywall-preview"], .paywall-preview, [data-test-id="content-preview"]"#
                .into(),
        }
    }
}

/// Compiled form of [`SiteRulesConfig`].
pub struct SiteRules {
    pub listing_item: Selector,
    pub listing_title: Selector,
    pub listing_time: Selector,
    pub listing_ticker: Selector,
    pub transcript_href_marker: String,
    pub anchor: Selector,
    pub article_title: Selector,
    pub article_time: Selector,
    pub article_body: Selector,
    pub article_paragraph: Selector,
    pub paywall_marker: Selector,
    pub paywall_preview: Selector,
}

impl SiteRules {
    pub fn compile(config: &SiteRulesConfig) -> ScrapeResult<Self> {
        Ok(Self {
            listing_item: compile(&config.listing_item)?,
            listing_title: compile(&config.listing_title)?,
            listing_time: compile(&config.listing_time)?,
            listing_ticker: compile(&config.listing_ticker)?,
            transcript_href_marker: config.transcript_href_marker.clone(),
            anchor: compile("a[href]")?,
            article_title: compile(&config.article_title)?,
            article_time: compile(&config.article_time)?,
            article_body: compile(&config.article_body)?,
            article_paragraph: compile(&config.article_paragraph)?,
            paywall_marker: compile(&config.paywall_marker)?,
            paywall_preview: compile(&config.paywall_preview)?,
        })
    }
}

fn compile(selector: &str) -> ScrapeResult<Selector> {
    Selector::parse(selector)
        .map_err(|err| ScrapeError::Parse(format!("bad selector `{selector}`: {err}")))
}

/// Pull a ticker symbol out of a transcript title, trying the
/// parenthesized form first.
pub fn ticker_from_title(title: &str) -> Option<String> {
    if let Some(caps) = PAREN_TICKER_RE.captures(title) {
        return Some(caps[1].to_string());
    }
    PREFIX_TICKER_RE
        .captures(title)
        .map(|caps| caps[1].to_string())
}

/// Collapse runs of whitespace the way rendered text displays them.
pub(crate) fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
