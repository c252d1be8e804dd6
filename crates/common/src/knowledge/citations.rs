//! Citation renumbering, backfill and reference-list construction
//!
//! Providers number citations in retrieval order. Answers shown to users use
//! the position of each source in the known-document directory instead, so
//! that `[3]` always means the third document regardless of which question
//! was asked.

use super::{KnownDocument, ProviderCitation};
use crate::types::Citation;
use regex_lite::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// Longest excerpt kept on a returned citation
pub const EXCERPT_MAX_CHARS: usize = 500;

/// Sentences between synthesized markers during backfill
const BACKFILL_INTERVAL: usize = 2;

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\s*)\[(\d+)\]").expect("valid marker pattern"))
}

/// Mapping from provider citation numbers to external document numbers
#[derive(Debug, Clone, Default)]
pub struct CitationNumbering {
    by_provider: HashMap<usize, usize>,
    order: Vec<usize>,
}

impl CitationNumbering {
    /// Match each provider citation against the directory
    ///
    /// Matching tries the exact filename, then the filename ignoring case,
    /// then the title. Unmatched sources are numbered after the last
    /// directory entry in first-seen order.
    pub fn build(documents: &[KnownDocument], citations: &[ProviderCitation]) -> Self {
        let mut numbering = Self::default();
        let mut overflow: HashMap<String, usize> = HashMap::new();

        for citation in citations {
            let external = match directory_position(documents, citation) {
                Some(index) => index + 1,
                None => {
                    let next = documents.len() + overflow.len() + 1;
                    *overflow
                        .entry(citation.filename.to_ascii_lowercase())
                        .or_insert(next)
                }
            };

            numbering.by_provider.insert(citation.number, external);
            if !numbering.order.contains(&external) {
                numbering.order.push(external);
            }
        }

        numbering
    }

    /// External number for a provider number
    pub fn external(&self, provider_number: usize) -> Option<usize> {
        self.by_provider.get(&provider_number).copied()
    }

    /// Distinct external numbers in provider order
    pub fn external_order(&self) -> &[usize] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.by_provider.is_empty()
    }
}

fn directory_position(documents: &[KnownDocument], citation: &ProviderCitation) -> Option<usize> {
    let filename = citation.filename.as_str();
    let title = citation.title.trim();

    documents
        .iter()
        .position(|doc| !filename.is_empty() && doc.name == filename)
        .or_else(|| {
            documents
                .iter()
                .position(|doc| !filename.is_empty() && doc.name.eq_ignore_ascii_case(filename))
        })
        .or_else(|| {
            documents.iter().position(|doc| {
                !title.is_empty()
                    && (doc.name.eq_ignore_ascii_case(title) || doc.stem().eq_ignore_ascii_case(title))
            })
        })
}

/// Whether the text carries any bracketed reference marker
pub fn has_markers(text: &str) -> bool {
    marker_pattern().is_match(text)
}

/// Rewrite provider markers to external numbers
///
/// Markers with no matching provider citation are dropped along with their
/// leading whitespace.
pub fn renumber_markers(text: &str, numbering: &CitationNumbering) -> String {
    marker_pattern()
        .replace_all(text, |caps: &Captures| {
            let mapped = caps[2]
                .parse::<usize>()
                .ok()
                .and_then(|n| numbering.external(n));

            match mapped {
                Some(n) => format!("{}[{}]", &caps[1], n),
                None => String::new(),
            }
        })
        .into_owned()
}

/// Split text after sentence-ending punctuation followed by whitespace
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_break = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_break {
                let end = i + c.len_utf8();
                sentences.push(&text[start..end]);
                start = end;
            }
        }
    }

    if !text[start..].trim().is_empty() {
        sentences.push(&text[start..]);
    }

    sentences
}

/// Insert a marker before a sentence's terminal punctuation
fn mark_sentence(sentence: &str, number: usize) -> String {
    let body = sentence.trim_end();
    let trailing = &sentence[body.len()..];
    let stripped = body.trim_end_matches(['.', '!', '?']);
    let punctuation = &body[stripped.len()..];

    format!("{} [{}]{}{}", stripped, number, punctuation, trailing)
}

/// Add markers to an answer that has none
///
/// A marker goes after every second sentence and after the final sentence,
/// cycling through `numbers` in order.
pub fn backfill_markers(text: &str, numbers: &[usize]) -> String {
    if numbers.is_empty() || text.trim().is_empty() {
        return text.to_string();
    }

    let sentences = split_sentences(text);
    let last = sentences.len().saturating_sub(1);
    let mut cycle = numbers.iter().cycle();
    let mut out = String::with_capacity(text.len() + sentences.len() * 4);

    for (i, sentence) in sentences.iter().enumerate() {
        let wants_marker = (i + 1) % BACKFILL_INTERVAL == 0 || i == last;
        match wants_marker.then(|| cycle.next()).flatten() {
            Some(&number) => out.push_str(&mark_sentence(sentence, number)),
            None => out.push_str(sentence),
        }
    }

    out
}

/// Sorted, deduplicated marker numbers present in the text
pub fn referenced_numbers(text: &str) -> Vec<usize> {
    marker_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps[2].parse::<usize>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Build one citation per marker number in the final answer
pub fn build_references(
    text: &str,
    numbering: &CitationNumbering,
    citations: &[ProviderCitation],
) -> Vec<Citation> {
    referenced_numbers(text)
        .into_iter()
        .filter_map(|number| {
            citations
                .iter()
                .find(|c| numbering.external(c.number) == Some(number))
                .map(|c| Citation {
                    number,
                    title: if c.title.trim().is_empty() {
                        c.filename.clone()
                    } else {
                        c.title.clone()
                    },
                    filename: c.filename.clone(),
                    content: truncate_excerpt(&c.content, EXCERPT_MAX_CHARS),
                    location: c.location.clone(),
                })
        })
        .collect()
}

/// Truncate on a word boundary, appending an ellipsis when cut
pub fn truncate_excerpt(content: &str, max_chars: usize) -> String {
    let content = content.trim();
    if content.chars().count() <= max_chars {
        return content.to_string();
    }

    let cut = content
        .char_indices()
        .nth(max_chars)
        .map_or(content.len(), |(i, _)| i);
    let head = &content[..cut];

    let head = match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };

    format!("{}...", head.trim_end())
}
