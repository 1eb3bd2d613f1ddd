//! Mention matching for message text.
//!
//! Shared by composition, rendering and notification classification so they
//! always agree on what a mention is. Identities may contain characters a
//! `\w` run stops at (`bob-x`, `Mary Ann`), so matching against a known
//! identity compares the whole name after `@` rather than a regex capture.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// `@name` where name is letters, digits or underscore.
pub static RE_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(\w+)").unwrap());

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// End offset of a case-insensitive `@name` token starting at byte `at`.
///
/// The character after the name must not be a word character, so `@bob`
/// does not match inside `@bobby`.
pub fn mention_at(text: &str, at: usize, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let rest = text.get(at..)?.strip_prefix('@')?;
    let mut chars = rest.char_indices();
    for wanted in name.chars() {
        let (_, found) = chars.next()?;
        if !found.to_lowercase().eq(wanted.to_lowercase()) {
            return None;
        }
    }
    let consumed = match chars.next() {
        Some((_, next)) if is_word_char(next) => return None,
        Some((offset, _)) => offset,
        None => rest.len(),
    };
    Some(at + 1 + consumed)
}

/// `\w+` mention starting exactly at byte `at`.
pub fn word_mention_at(text: &str, at: usize) -> Option<usize> {
    RE_MENTION
        .find_at(text, at)
        .filter(|m| m.start() == at)
        .map(|m| m.end())
}

/// Case-insensitive check for an `@name` token anywhere in `text`.
pub fn mentions(text: &str, name: &str) -> bool {
    text.match_indices('@')
        .any(|(at, _)| mention_at(text, at, name).is_some())
}

/// Names mentioned in `text`, in order of appearance.
///
/// At each `@` the longest matching `known` identity wins and is reported in
/// its registered spelling; otherwise the `\w+` run after the `@` is used.
pub fn mentioned_identities(text: &str, known: &BTreeSet<String>) -> Vec<String> {
    let mut names = Vec::new();
    let mut last = 0;
    for (at, _) in text.match_indices('@') {
        if at < last {
            continue;
        }
        let best = known
            .iter()
            .filter_map(|name| mention_at(text, at, name).map(|end| (end, name)))
            .max_by_key(|(end, _)| *end);
        if let Some((end, name)) = best {
            names.push(name.clone());
            last = end;
        } else if let Some(end) = word_mention_at(text, at) {
            names.push(text[at + 1..end].to_string());
            last = end;
        }
    }
    names
}
