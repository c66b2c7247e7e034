// src/resolver.rs
//! Finds where a quiz page wants its answer POSTed.
//!
//! Quiz pages only promise a natural-language instruction such as
//! "POST this JSON to /submit", so the target is picked from the rendered text:
//! every URL-looking token is a candidate and the one closest to a trigger phrase wins.

use regex::Regex;
use std::sync::LazyLock;
use url::Url;

use crate::errors::{AgentError, Result};

pub const DEFAULT_TRIGGERS: &[&str] = &[
    "post your answer",
    "post the answer",
    "send your answer",
    "post this",
    "submit",
];

static ABSOLUTE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>`]+"#).expect("absolute url pattern"));

// A path is only page-relative when the slash does not continue a word, host or scheme.
static RELATIVE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^\w/:.\-])(/[^\s"'<>`]*)"#).expect("relative path pattern")
});

const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '\'', '"'];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    url: Url,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone)]
pub struct SubmissionResolver {
    triggers: Vec<String>,
}

impl Default for SubmissionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGERS.iter().copied())
    }
}

impl SubmissionResolver {
    /// Trigger phrases are matched ASCII case-insensitively.
    pub fn new<I, S>(triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let triggers = triggers
            .into_iter()
            .map(|t| t.as_ref().trim().to_ascii_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { triggers }
    }

    pub fn resolve(&self, page_text: &str, current_url: &str) -> Result<Url> {
        let current = Url::parse(current_url.trim()).map_err(|source| AgentError::InvalidUrl {
            url: current_url.to_string(),
            source,
        })?;

        let candidates = extract_candidates(page_text, &current);
        if candidates.is_empty() {
            return Err(AgentError::NoTargetFound(
                "page text contains no URL other than the page itself".to_string(),
            ));
        }

        let trigger_spans = self.trigger_spans(page_text);
        candidates
            .into_iter()
            .min_by_key(|c| (distance(page_text, c, &trigger_spans), c.start))
            .map(|c| c.url)
            .ok_or_else(|| AgentError::NoTargetFound("no candidate survived filtering".to_string()))
    }

    fn trigger_spans(&self, text: &str) -> Vec<(usize, usize)> {
        // ASCII lowering keeps byte offsets aligned with the original text.
        let lowered = text.to_ascii_lowercase();
        let mut spans: Vec<(usize, usize)> = self
            .triggers
            .iter()
            .flat_map(|t| lowered.match_indices(t.as_str()).map(|(i, m)| (i, i + m.len())))
            .collect();
        spans.sort_unstable();
        spans
    }
}

/// Resolves with the default trigger phrases.
pub fn resolve(page_text: &str, current_url: &str) -> Result<Url> {
    SubmissionResolver::default().resolve(page_text, current_url)
}

fn extract_candidates(text: &str, current: &Url) -> Vec<Candidate> {
    let mut found: Vec<Candidate> = Vec::new();
    let mut absolute_spans = Vec::new();

    for m in ABSOLUTE_URL.find_iter(text) {
        absolute_spans.push((m.start(), m.end()));
        let raw = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        if let Ok(url) = Url::parse(raw) {
            found.push(Candidate { url, start: m.start(), end: m.start() + raw.len() });
        }
    }

    for caps in RELATIVE_PATH.captures_iter(text) {
        let Some(m) = caps.get(1) else { continue };
        if absolute_spans.iter().any(|&(s, e)| m.start() >= s && m.start() < e) {
            continue;
        }
        let raw = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        if raw.len() < 2 {
            continue;
        }
        if let Ok(url) = current.join(raw) {
            found.push(Candidate { url, start: m.start(), end: m.start() + raw.len() });
        }
    }

    found.sort_by_key(|c| c.start);

    let mut candidates: Vec<Candidate> = Vec::new();
    for candidate in found {
        if same_page(&candidate.url, current) || candidates.iter().any(|c| c.url == candidate.url) {
            continue;
        }
        candidates.push(candidate);
    }
    candidates
}

fn same_page(a: &Url, b: &Url) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    a == b
}

/// Characters between the candidate and the nearest trigger; overlap counts as zero.
fn distance(text: &str, candidate: &Candidate, triggers: &[(usize, usize)]) -> usize {
    triggers
        .iter()
        .map(|&(ts, te)| {
            if te <= candidate.start {
                text[te..candidate.start].chars().count()
            } else if ts >= candidate.end {
                text[candidate.end..ts].chars().count()
            } else {
                0
            }
        })
        .min()
        .unwrap_or(usize::MAX)
}
