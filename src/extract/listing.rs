//! Listing-page extraction.
//!
//! Primary path walks the structured listing containers; when the site ships
//! a redesigned listing without them, a fallback scans every anchor whose
//! href carries the transcript path marker. Both paths produce the same
//! stub shape.

use scraper::Html;
use url::Url;

use crate::records::TranscriptStub;

use super::{SiteRules, normalize_ws, ticker_from_title};

/// Minimum title length for the anchor-scan fallback; filters out "Read
/// more" style link stubs.
const MIN_FALLBACK_TITLE_LEN: usize = 10;

/// Extract transcript stubs from one listing page, in document order.
pub fn parse_listing(
    html: &str,
    rules: &SiteRules,
    base_url: &Url,
    page: u32,
) -> Vec<TranscriptStub> {
    let document = Html::parse_document(html);

    let mut stubs = Vec::new();
    for item in document.select(&rules.listing_item) {
        let Some(anchor) = item.select(&rules.listing_title).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(url) = base_url.join(href) else {
            log::debug!("unjoinable listing href: {href}");
            continue;
        };

        let title = normalize_ws(&anchor.text().collect::<String>());
        if title.is_empty() {
            continue;
        }

        let published = item
            .select(&rules.listing_time)
            .next()
            .and_then(|time| {
                time.value()
                    .attr("datetime")
                    .map(str::to_string)
                    .or_else(|| Some(normalize_ws(&time.text().collect::<String>())))
            })
            .filter(|s| !s.is_empty());

        let ticker = item
            .select(&rules.listing_ticker)
            .next()
            .map(|el| normalize_ws(&el.text().collect::<String>()))
            .filter(|s| !s.is_empty())
            .or_else(|| ticker_from_title(&title));

        stubs.push(TranscriptStub {
            title,
            url,
            ticker,
            published,
            page,
            position: stubs.len() as u32,
        });
    }

    if !stubs.is_empty() {
        return stubs;
    }

    log::debug!("no structured listing items on page {page}, falling back to anchor scan");
    anchor_scan(&document, rules, base_url, page)
}

fn anchor_scan(
    document: &Html,
    rules: &SiteRules,
    base_url: &Url,
    page: u32,
) -> Vec<TranscriptStub> {
    let mut stubs = Vec::new();
    for anchor in document.select(&rules.anchor) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if !href.contains(&rules.transcript_href_marker) {
            continue;
        }
        let Ok(url) = base_url.join(href) else {
            continue;
        };

        let title = normalize_ws(&anchor.text().collect::<String>());
        if title.len() <= MIN_FALLBACK_TITLE_LEN {
            continue;
        }

        let ticker = ticker_from_title(&title);
        stubs.push(TranscriptStub {
            title,
            url,
            ticker,
            published: None,
            page,
            position: stubs.len() as u32,
        });
    }
    stubs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{SiteRules, SiteRulesConfig};

    fn rules() -> SiteRules {
        SiteRules::compile(&SiteRulesConfig::default()).unwrap()
    }

    fn base() -> Url {
        Url::parse("https://example.com").unwrap()
    }

    const STRUCTURED: &str = r#"
        <html><body>
        <article data-test-id="post-list-item">
            <a data-test-id="post-list-item-title" href="/article/1-apple-aapl-q3-earnings-call-transcript">
                Apple Inc. (AAPL) Q3 2026 Earnings Call Transcript
            </a>
            <time datetime="2026-07-30T21:00:00Z">Jul. 30</time>
            <span data-test-id="post-list-item-ticker">AAPL</span>
        </article>
        <article data-test-id="post-list-item">
            <a data-test-id="post-list-item-title" href="/article/2-acme-q1-earnings-call-transcript">
                Acme Corp. Q1 2026 Earnings Call Transcript
            </a>
        </article>
        </body></html>
    "#;

    #[test]
    fn structured_listing_yields_ordered_stubs() {
        let stubs = parse_listing(STRUCTURED, &rules(), &base(), 1);
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].ticker.as_deref(), Some("AAPL"));
        assert_eq!(stubs[0].published.as_deref(), Some("2026-07-30T21:00:00Z"));
        assert_eq!(stubs[0].position, 0);
        assert_eq!(
            stubs[0].url.as_str(),
            "https://example.com/article/1-apple-aapl-q3-earnings-call-transcript"
        );
        assert_eq!(stubs[1].ticker, None);
        assert_eq!(stubs[1].published, None);
        assert_eq!(stubs[1].position, 1);
        assert_eq!(stubs[1].page, 1);
    }

    #[test]
    fn anchor_scan_fallback_on_unstructured_markup() {
        let html = r#"
            <html><body>
            <a href="/article/3-beta-earnings-call-transcript">Beta Industries (BETA) Q2 Earnings Call Transcript</a>
            <a href="/article/3-beta-earnings-call-transcript">more</a>
            <a href="/news/unrelated">Unrelated Headline That Is Long Enough</a>
            </body></html>
        "#;
        let stubs = parse_listing(html, &rules(), &base(), 2);
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].ticker.as_deref(), Some("BETA"));
        assert_eq!(stubs[0].page, 2);
    }

    #[test]
    fn empty_page_yields_no_stubs() {
        let stubs = parse_listing("<html><body></body></html>", &rules(), &base(), 5);
        assert!(stubs.is_empty());
    }
}
