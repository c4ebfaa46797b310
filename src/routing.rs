//! Matching rules shared by the protocol implementations.
//!
//! Each protocol decides whether a published message reaches a subscriber by combining
//! these primitives: exact names, AMQP topic patterns, Redis glob patterns and AMQP header
//! arguments.
use crate::envelope::Headers;

/// Exact, case-sensitive equality.
pub fn exact(expected: &str, actual: &str) -> bool {
    expected == actual
}

/// AMQP topic matching over `.`-separated words.
///
/// `*` matches exactly one word, `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let routing_key: Vec<&str> = routing_key.split('.').collect();
    words_match(&pattern, &routing_key)
}

fn words_match(pattern: &[&str], words: &[&str]) -> bool {
    match (pattern.split_first(), words.split_first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some((&"#", rest)), _) => {
            words_match(rest, words) || (!words.is_empty() && words_match(pattern, &words[1..]))
        }
        (Some(_), None) => false,
        (Some((&"*", rest)), Some((_, remaining))) => words_match(rest, remaining),
        (Some((expected, rest)), Some((word, remaining))) => {
            expected == word && words_match(rest, remaining)
        }
    }
}

/// Redis-style glob matching.
///
/// Supports `*` (any sequence, including empty), `?` (any single character),
/// `[...]` character classes with ranges and `^` negation, and `\` escapes.
pub fn glob_matches(pattern: &str, subject: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let subject: Vec<char> = subject.chars().collect();

    let (mut p, mut s) = (0, 0);
    // Position of the last `*` seen in the pattern and the subject position it is anchored at.
    let mut backtrack: Option<(usize, usize)> = None;

    while s < subject.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, s));
            p += 1;
            continue;
        }
        if p < pattern.len() {
            if let Some(next) = match_single(&pattern, p, subject[s]) {
                p = next;
                s += 1;
                continue;
            }
        }
        match backtrack {
            Some((star, anchor)) => {
                p = star + 1;
                s = anchor + 1;
                backtrack = Some((star, anchor + 1));
            }
            None => return false,
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Match the pattern token starting at `p` against a single character.
/// Returns the position of the next token on success.
fn match_single(pattern: &[char], p: usize, c: char) -> Option<usize> {
    match pattern[p] {
        '?' => Some(p + 1),
        '\\' if p + 1 < pattern.len() => (pattern[p + 1] == c).then_some(p + 2),
        '[' => match_class(pattern, p, c),
        literal => (literal == c).then_some(p + 1),
    }
}

fn match_class(pattern: &[char], start: usize, c: char) -> Option<usize> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (low, high) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= low <= c && c <= high;
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }
    // An unterminated class runs until the end of the pattern.
    let next = if i < pattern.len() { i + 1 } else { i };
    (matched != negate).then_some(next)
}

/// AMQP headers-exchange matching.
///
/// `x-match` selects the mode: `all` (the default) requires every binding argument to be
/// present with an equal value, `any` requires at least one. Arguments starting with `x-` are
/// ignored unless the `any-with-x`/`all-with-x` modes are used.
/// A binding without arguments matches every message.
pub fn headers_match(bind_arguments: &Headers, headers: &Headers) -> bool {
    let mode = bind_arguments
        .get("x-match")
        .map(String::as_str)
        .unwrap_or("all");
    let include_extensions = mode.ends_with("-with-x");
    let mut required = bind_arguments
        .iter()
        .filter(|(name, _)| name.as_str() != "x-match")
        .filter(|(name, _)| include_extensions || !name.starts_with("x-"))
        .peekable();
    if required.peek().is_none() {
        return true;
    }
    let present = |(name, value): (&String, &String)| headers.get(name) == Some(value);
    if mode.starts_with("any") {
        required.any(present)
    } else {
        required.all(present)
    }
}
