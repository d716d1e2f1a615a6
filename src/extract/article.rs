//! Transcript article extraction.
//!
//! A transcript page yields paragraphs in reading order, a paywall verdict,
//! and two derived views: the participants roster and the start of the
//! question-and-answer session. When the paywall marker is present only the
//! preview paragraphs exist in the DOM, so the record carries whatever is
//! there with `is_paywalled` set.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::Html;
use url::Url;

use crate::records::{Participant, TranscriptRecord};

use super::{SiteRules, normalize_ws, ticker_from_title};

static PARTICIPANTS_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^(company|conference call|call) participants:?$")
        .case_insensitive(true)
        .build()
        .expect("invalid participants heading regex")
});

static QA_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^(question.{1,3}and.{1,3}answer session|q&a session|questions and answers):?$")
        .case_insensitive(true)
        .build()
        .expect("invalid Q&A heading regex")
});

/// `Name - Title` / `Name – Title` roster lines under a participants
/// heading.
static PARTICIPANT_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^–—-]{2,60}?)\s*[–—-]\s+(.{2,80})$").expect("invalid participant line regex")
});

/// Extract one transcript record from an article page.
///
/// Lenient throughout; an empty or unrecognizable page produces a record
/// with no content rather than an error, and the caller decides whether
/// that is worth keeping.
pub fn parse_article(html: &str, url: &Url, rules: &SiteRules) -> TranscriptRecord {
    let document = Html::parse_document(html);

    let title = document
        .select(&rules.article_title)
        .next()
        .map(|el| normalize_ws(&el.text().collect::<String>()))
        .filter(|s| !s.is_empty());

    let published = document
        .select(&rules.article_time)
        .next()
        .and_then(|time| {
            time.value()
                .attr("datetime")
                .map(str::to_string)
                .or_else(|| Some(normalize_ws(&time.text().collect::<String>())))
        })
        .filter(|s| !s.is_empty());

    let is_paywalled = document.select(&rules.paywall_marker).next().is_some();

    // Gated pages sometimes ship the full body in the markup anyway; the
    // preview container is what the site actually shows, so it wins.
    let container = if is_paywalled {
        document
            .select(&rules.paywall_preview)
            .next()
            .or_else(|| document.select(&rules.article_body).next())
    } else {
        document.select(&rules.article_body).next()
    };

    let mut content = Vec::new();
    if let Some(body) = container {
        for paragraph in body.select(&rules.article_paragraph) {
            let text = normalize_ws(&paragraph.text().collect::<String>());
            if !text.is_empty() {
                content.push(text);
            }
        }
    }

    if is_paywalled {
        log::info!("paywalled transcript at {url} ({} preview paragraphs)", content.len());
    }

    let participants = extract_participants(&content);
    let qa_section = extract_qa_section(&content);
    let ticker = title.as_deref().and_then(ticker_from_title);

    TranscriptRecord {
        title,
        url: url.clone(),
        ticker,
        published,
        content,
        is_paywalled,
        participants,
        qa_section,
        fetched_at: Utc::now(),
    }
}

/// Roster lines between a participants heading and the next non-roster
/// paragraph. Both the company and conference-call sections feed the same
/// list.
fn extract_participants(content: &[String]) -> Vec<Participant> {
    let mut participants = Vec::new();
    let mut in_roster = false;

    for paragraph in content {
        if PARTICIPANTS_HEADING_RE.is_match(paragraph) {
            in_roster = true;
            continue;
        }
        if !in_roster {
            continue;
        }
        match PARTICIPANT_LINE_RE.captures(paragraph) {
            Some(caps) => participants.push(Participant {
                name: caps[1].trim().to_string(),
                title: Some(caps[2].trim().to_string()),
            }),
            None => in_roster = false,
        }
    }

    participants
}

/// Everything from the question-and-answer heading onward, as one block.
fn extract_qa_section(content: &[String]) -> Option<String> {
    let start = content
        .iter()
        .position(|paragraph| QA_HEADING_RE.is_match(paragraph))?;
    let section = content[start..].join("\n");
    Some(section)
}
