//! Utility functions and helpers.

pub mod log;

use std::sync::OnceLock;

use regex::Regex;

/// Normalize a name for lookup keys: lowercase, collapsed whitespace.
pub fn normalize_key(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a postal code: strip non-digits, keep the first 5 digits
/// (US ZIP convention).
pub fn normalize_postal(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).take(5).collect()
}

/// Extract a postal code from a formatted address (fallback when the
/// search service omits structured address components).
pub fn extract_postal_code(address: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d{5})(?:-\d{4})?\b").expect("postal code pattern is valid")
    });

    // The postal code is conventionally the last numeric group in a
    // formatted address, after street numbers.
    pattern
        .captures_iter(address)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Similarity score between a query name and a candidate name, in [0, 1].
pub fn match_score(query: &str, candidate: &str) -> f64 {
    strsim::jaro_winkler(&normalize_key(query), &normalize_key(candidate))
}
