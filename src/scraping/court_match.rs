//! Exact / fuzzy classification of court filter options.

use crate::scraping::automation::CourtCandidates;

pub const FUZZY_THRESHOLD: f64 = 0.6;
pub const MAX_FUZZY_MATCHES: usize = 10;

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Sørensen–Dice coefficient over character bigrams, in `0.0..=1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let left = bigrams(a);
    let mut right = bigrams(b);
    if left.is_empty() || right.is_empty() {
        return if a.trim().eq_ignore_ascii_case(b.trim()) { 1.0 } else { 0.0 };
    }
    let total = left.len() + right.len();
    let mut shared = 0usize;
    for pair in &left {
        if let Some(pos) = right.iter().position(|p| p == pair) {
            right.swap_remove(pos);
            shared += 1;
        }
    }
    (2 * shared) as f64 / total as f64
}

/// Split `options` into exact (case-insensitive substring) and fuzzy matches
/// for `user_input`. Options are trimmed and de-duplicated in page order.
pub fn classify(user_input: &str, options: &[String]) -> CourtCandidates {
    let mut unique: Vec<String> = Vec::with_capacity(options.len());
    for opt in options.iter().map(|o| o.trim()).filter(|o| !o.is_empty()) {
        if !unique.iter().any(|u| u == opt) {
            unique.push(opt.to_string());
        }
    }

    let needle = user_input.trim().to_lowercase();
    let exact_matches: Vec<String> = if needle.is_empty() {
        Vec::new()
    } else {
        unique
            .iter()
            .filter(|o| o.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    };

    let mut scored: Vec<(f64, &String)> = unique
        .iter()
        .filter(|o| !exact_matches.contains(o))
        .map(|o| (similarity(user_input, o), o))
        .filter(|(score, _)| *score >= FUZZY_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    let fuzzy_matches = scored
        .into_iter()
        .take(MAX_FUZZY_MATCHES)
        .map(|(_, o)| o.clone())
        .collect();

    CourtCandidates {
        user_input: user_input.to_string(),
        options: unique,
        exact_matches,
        fuzzy_matches,
    }
}
