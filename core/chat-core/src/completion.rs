//! `@mention` completion over the known-user cache.

use std::collections::BTreeSet;

/// Candidates for the last word of `line` when it starts with `@`.
///
/// Matching is a case-insensitive prefix match; results keep the cached
/// spelling and come back sorted.
pub fn complete_mention(line: &str, known: &BTreeSet<String>) -> Vec<String> {
    let word = line.rsplit(' ').next().unwrap_or("");
    let Some(prefix) = word.strip_prefix('@') else {
        return Vec::new();
    };
    let prefix = prefix.to_lowercase();

    known
        .iter()
        .filter(|name| name.to_lowercase().starts_with(&prefix))
        .map(|name| format!("@{}", name))
        .collect()
}
