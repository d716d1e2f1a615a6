//! Data model shared across the pipeline.
//!
//! Stubs are lightweight listing-page records keyed by url; full records add
//! the extracted article content and paywall status. The output document is
//! the serializable artifact callers hand to their own I/O layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Listing-page record before the article itself is fetched.
///
/// Immutable once produced; deduplicated by `url` across a pagination run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptStub {
    pub title: String,
    /// Absolute article url. Unique key for deduplication.
    pub url: Url,
    /// Stock symbol derived from the title or listing markup, when present.
    pub ticker: Option<String>,
    /// Publish date as the listing reports it (usually ISO 8601).
    pub published: Option<String>,
    /// Listing page this stub came from (1-based).
    pub page: u32,
    /// Position within its listing page (0-based, document order).
    pub position: u32,
}

/// A call participant parsed from the transcript header section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub title: Option<String>,
}

/// Fully extracted transcript article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub title: Option<String>,
    pub url: Url,
    pub ticker: Option<String>,
    pub published: Option<String>,
    /// Body paragraphs in document order. Preview-only when paywalled.
    pub content: Vec<String>,
    pub is_paywalled: bool,
    pub participants: Vec<Participant>,
    /// Content from the first Q&A marker onward, when the section exists.
    pub qa_section: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl TranscriptRecord {
    /// Paragraphs joined with newlines, the shape most consumers want.
    pub fn content_text(&self) -> String {
        self.content.join("\n")
    }
}

/// Entry of the output document: either a listing stub or a full record,
/// consistent per invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentEntry {
    Record(TranscriptRecord),
    Stub(TranscriptStub),
}

/// Serializable result artifact of one pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeDocument {
    pub scraped_at: DateTime<Utc>,
    pub count: usize,
    pub transcripts: Vec<DocumentEntry>,
}

impl ScrapeDocument {
    pub fn from_stubs(stubs: Vec<TranscriptStub>) -> Self {
        Self {
            scraped_at: Utc::now(),
            count: stubs.len(),
            transcripts: stubs.into_iter().map(DocumentEntry::Stub).collect(),
        }
    }

    pub fn from_records(records: Vec<TranscriptRecord>) -> Self {
        Self {
            scraped_at: Utc::now(),
            count: records.len(),
            transcripts: records.into_iter().map(DocumentEntry::Record).collect(),
        }
    }
}

/// Per-ticker failure inside a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub ticker: String,
    pub error: String,
}

/// Consolidated outcome of a multi-ticker batch.
///
/// One ticker failing (or hitting a paywall) never aborts the whole batch;
/// the report keeps the three buckets apart so callers can decide what to
/// retry or surface.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub fetched: Vec<TranscriptRecord>,
    pub paywalled: Vec<TranscriptRecord>,
    /// Tickers that resolved to no transcript at all.
    pub not_found: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.fetched.is_empty()
            && self.paywalled.is_empty()
            && self.not_found.is_empty()
            && self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.fetched.len() + self.paywalled.len() + self.not_found.len() + self.failed.len()
    }
}
