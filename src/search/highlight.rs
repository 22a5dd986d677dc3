//! Query-term snippets.
//!
//! Keeps `window` tokens on each side of every token that contains a query
//! term and elides the rest with `...`.

/// Default number of tokens kept on each side of a match.
pub const DEFAULT_WINDOW: usize = 5;

const ELLIPSIS: &str = "...";

/// Build a snippet of `passage` around occurrences of `terms`.
///
/// Tokens are split on whitespace and a token matches when it contains a
/// term, ignoring case. Kept runs are joined by a single `...`. A leading
/// `...` marks tokens dropped before the first run and a trailing `...`
/// marks tokens dropped after the last one. When nothing matches, or no
/// usable terms are given, the passage is returned unchanged.
pub fn highlight<S: AsRef<str>>(passage: &str, terms: &[S], window: usize) -> String {
    let terms: Vec<String> = terms
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return passage.to_string();
    }

    let tokens: Vec<&str> = passage.split_whitespace().collect();
    if tokens.is_empty() {
        return passage.to_string();
    }

    let mut relevant = vec![false; tokens.len()];
    let mut matched = false;
    for (idx, token) in tokens.iter().enumerate() {
        let lower = token.to_lowercase();
        if terms.iter().any(|term| lower.contains(term.as_str())) {
            matched = true;
            let start = idx.saturating_sub(window);
            let end = idx.saturating_add(window).min(tokens.len() - 1);
            relevant[start..=end].fill(true);
        }
    }
    if !matched {
        return passage.to_string();
    }

    let mut out: Vec<&str> = Vec::new();
    if !relevant[0] {
        out.push(ELLIPSIS);
    }
    for (idx, &token) in tokens.iter().enumerate() {
        if !relevant[idx] {
            continue;
        }
        if idx > 0 && !relevant[idx - 1] && out.last() != Some(&ELLIPSIS) {
            out.push(ELLIPSIS);
        }
        out.push(token);
    }
    if !relevant[tokens.len() - 1] {
        out.push(ELLIPSIS);
    }

    out.join(" ")
}
