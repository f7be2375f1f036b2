// src/selector/scoring.rs
// Deterministic relevance scoring and token estimation

/// Rough token estimate: ~4 characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4).max(1)
}

/// Lowercased alphanumeric terms of a text.
fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Lexical relevance of `text` to `goal` in [0, 1]: the fraction of goal
/// terms that appear in the text. Plain term overlap; no model in the loop.
pub fn lexical_relevance(goal: &str, text: &str) -> f64 {
    let goal_terms = terms(goal);
    if goal_terms.is_empty() {
        return 0.0;
    }
    let text_terms: std::collections::HashSet<String> = terms(text).into_iter().collect();
    let matched = goal_terms
        .iter()
        .filter(|t| text_terms.contains(*t))
        .count();
    matched as f64 / goal_terms.len() as f64
}
