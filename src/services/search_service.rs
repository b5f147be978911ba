use std::cmp::Ordering;

use log::{debug, info};

use crate::types::{EntryKind, SharedEntry};

/// Queries, and words of a query scored on their own, need this many characters
const MIN_QUERY_CHARS: usize = 3;
/// Highest accepted edit distance per token character
const MAX_ERROR_RATE: f32 = 0.25;
/// Only this many leading characters of a field are scanned approximately
const FUZZY_WINDOW: usize = 4096;

/// Fuzzy full-text search over cached entries
///
/// An entry whose path, title or content contains the whole query
/// (case-insensitively) scores 0. Otherwise every word of the query has to
/// match one of those fields, either as a substring or within the allowed
/// edit distance. Lower scores are better.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchService;

struct Token {
    text: String,
    chars: Vec<char>,
}

impl SearchService {
    /// Create a new search service
    pub fn new() -> Self {
        Self
    }

    /// Search `entries` for `query`, best matches first
    pub fn search<'e>(&self, entries: impl IntoIterator<Item = &'e SharedEntry>, query: &str) -> Vec<SharedEntry> {
        let phrase = query.trim().to_lowercase();
        if phrase.chars().count() < MIN_QUERY_CHARS {
            debug!("Search query '{}' is too short", query);
            return Vec::new();
        }
        let tokens = tokenize(&phrase);

        info!("Starting search for query: '{}'", query);
        let start_time = std::time::Instant::now();

        let mut scored: Vec<(f32, SharedEntry)> = entries
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .filter_map(|entry| score_entry(entry, &phrase, &tokens).map(|score| (score, entry.clone())))
            .collect();
        // stable sort keeps content-path order among equal scores
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        info!(
            "Search completed in {}ms, found {} results",
            start_time.elapsed().as_millis(),
            scored.len()
        );
        if let Some((score, entry)) = scored.first() {
            debug!("Top result {} scored {:.2}", entry.content_path, score);
        }
        scored.into_iter().map(|(_, entry)| entry).collect()
    }
}

fn tokenize(phrase: &str) -> Vec<Token> {
    phrase
        .split_whitespace()
        .filter(|word| word.chars().count() >= MIN_QUERY_CHARS)
        .map(|word| Token { text: word.to_string(), chars: word.chars().collect() })
        .collect()
}

fn score_entry(entry: &SharedEntry, phrase: &str, tokens: &[Token]) -> Option<f32> {
    let mut fields = vec![entry.content_path.to_lowercase()];
    if let Some(title) = entry.title() {
        fields.push(title.to_lowercase());
    }
    if let Some(text) = entry.text() {
        fields.push(text.to_lowercase());
    }
    if fields.iter().any(|field| field.contains(phrase)) {
        return Some(0.0);
    }
    if tokens.is_empty() {
        return None;
    }

    let mut total = 0.0;
    for token in tokens {
        let best = fields
            .iter()
            .map(|field| field_score(token, field))
            .fold(f32::MAX, f32::min);
        if best > MAX_ERROR_RATE {
            return None;
        }
        total += best;
    }
    Some(total / tokens.len() as f32)
}

fn field_score(token: &Token, field: &str) -> f32 {
    if field.contains(&token.text) {
        return 0.0;
    }
    let window: Vec<char> = field.chars().take(FUZZY_WINDOW).collect();
    approximate_distance(&token.chars, &window) as f32 / token.chars.len() as f32
}

/// Smallest edit distance between `pattern` and any substring of `text`
fn approximate_distance(pattern: &[char], text: &[char]) -> usize {
    let m = pattern.len();
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];
    let mut best = m;
    for &c in text {
        curr[0] = 0;
        for i in 1..=m {
            let substitution = prev[i - 1] + usize::from(pattern[i - 1] != c);
            curr[i] = substitution.min(prev[i] + 1).min(curr[i - 1] + 1);
        }
        best = best.min(curr[m]);
        std::mem::swap(&mut prev, &mut curr);
    }
    best
}
