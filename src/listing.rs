//! Listing pagination with dedup and early stop.
//!
//! Pages are fetched strictly in order, paced before every fetch. The walk
//! stops at the page limit, at the first empty page, or when a page yields
//! nothing but already-seen urls (the site silently serves the last page
//! again past the end). Cancellation between pages returns the stubs
//! collected so far instead of an error.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::ScrapeResult;
use crate::extract::{SiteRules, parse_listing};
use crate::fetch::Fetcher;
use crate::records::TranscriptStub;
use crate::retry::RetryController;
use crate::stealth::Pacer;

/// Why the walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PageLimit,
    EmptyPage,
    RepeatedPage,
    Cancelled,
}

/// Outcome of one listing walk.
#[derive(Debug)]
pub struct Pagination {
    /// Deduplicated stubs in listing order (page, then position).
    pub stubs: Vec<TranscriptStub>,
    pub pages_fetched: u32,
    pub stopped: StopReason,
}

/// Walks numbered listing pages through a fetcher and retry controller.
pub struct ListingPaginator<'a> {
    fetcher: &'a dyn Fetcher,
    retry: &'a RetryController,
    pacer: &'a Pacer,
    rules: &'a SiteRules,
    cancel: CancellationToken,
    listing_url: Url,
}

impl<'a> ListingPaginator<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        retry: &'a RetryController,
        pacer: &'a Pacer,
        rules: &'a SiteRules,
        cancel: CancellationToken,
        listing_url: Url,
    ) -> Self {
        Self {
            fetcher,
            retry,
            pacer,
            rules,
            cancel,
            listing_url,
        }
    }

    /// Url for a given 1-based page number. Page 1 is the bare listing.
    fn page_url(&self, page: u32) -> Url {
        if page <= 1 {
            return self.listing_url.clone();
        }
        let mut url = self.listing_url.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url
    }

    /// Collect stubs across up to `max_pages` pages.
    pub async fn collect(&self, max_pages: u32) -> ScrapeResult<Pagination> {
        let mut seen: HashSet<Url> = HashSet::new();
        let mut stubs: Vec<TranscriptStub> = Vec::new();
        let mut pages_fetched = 0u32;

        for page in 1..=max_pages.max(1) {
            if self.cancel.is_cancelled() {
                log::info!("listing walk cancelled after {pages_fetched} pages");
                return Ok(Pagination {
                    stubs,
                    pages_fetched,
                    stopped: StopReason::Cancelled,
                });
            }

            self.pacer.pace().await;

            let url = self.page_url(page);
            let response = self.retry.fetch(self.fetcher, &url).await?;
            pages_fetched += 1;

            let page_stubs = parse_listing(&response.body, self.rules, &self.listing_url, page);
            if page_stubs.is_empty() {
                log::info!("listing page {page} is empty, stopping");
                return Ok(Pagination {
                    stubs,
                    pages_fetched,
                    stopped: StopReason::EmptyPage,
                });
            }

            let mut fresh = 0usize;
            for stub in page_stubs {
                if seen.insert(stub.url.clone()) {
                    stubs.push(stub);
                    fresh += 1;
                }
            }

            // A non-empty page of nothing but duplicates means the site is
            // serving the same tail page for every further number.
            if fresh == 0 {
                log::info!("listing page {page} repeated earlier content, stopping");
                return Ok(Pagination {
                    stubs,
                    pages_fetched,
                    stopped: StopReason::RepeatedPage,
                });
            }

            log::debug!("listing page {page}: {fresh} new stubs ({} total)", stubs.len());
        }

        Ok(Pagination {
            stubs,
            pages_fetched,
            stopped: StopReason::PageLimit,
        })
    }
}
