// src/generalize/volatile.rs

//! Wildcarding of tokens that change between releases
//!
//! Versions, build dates, hashes and the per-version Caskroom directory are
//! replaced by `*` so a rule keeps matching after an upgrade. The
//! separator-preserving mode keeps the shape of a version (`1.2.3` becomes
//! `*.*.*`) and leaves hashes literal; it is the narrower fallback when the
//! collapsed form would be too broad.

use regex::{Match, Regex};
use std::sync::LazyLock;

static NUMERIC_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:[.,_][0-9]+)+").unwrap());
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").unwrap());
static ALNUM_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9A-Za-z]+").unwrap());
static STAFF_OWNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^-/:][^:/]*:staff$").unwrap());

/// How volatile runs are replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Each volatile run becomes a single `*`
    Collapse,
    /// Digit groups become `*`, separators stay, hashes stay literal
    PreserveSeparators,
}

/// Wildcard the volatile parts of one token
pub fn normalize(token: &str, mode: Mode) -> String {
    let token = caskroom_version(token, mode);
    let token = numeric_runs(&token, mode);
    let token = match mode {
        Mode::Collapse => volatile_words(&token),
        Mode::PreserveSeparators => token,
    };
    collapse_stars(&token)
}

/// `alice:staff` becomes `*:staff`; `None` for anything else
pub fn normalize_owner(token: &str) -> Option<String> {
    STAFF_OWNER
        .is_match(token)
        .then(|| "*:staff".to_string())
}

/// The directory after `Caskroom/<token>/` names the installed version
fn caskroom_version(token: &str, mode: Mode) -> String {
    if !token.contains("/Caskroom/") {
        return token.to_string();
    }
    let mut parts: Vec<String> = token.split('/').map(str::to_string).collect();
    if let Some(idx) = parts.iter().position(|p| p == "Caskroom")
        && idx + 2 < parts.len()
        && !parts[idx + 2].is_empty()
    {
        parts[idx + 2] = match mode {
            Mode::Collapse => "*".to_string(),
            Mode::PreserveSeparators => DIGITS.replace_all(&parts[idx + 2], "*").into_owned(),
        };
    }
    parts.join("/")
}

/// Dotted, comma or underscore separated digit groups (`1.2.3`,
/// `13.6.3,24585314`). A run glued to a word (`x86_64`) is not a version,
/// except after a lone `v`.
fn numeric_runs(token: &str, mode: Mode) -> String {
    let mut out = String::with_capacity(token.len());
    let mut last = 0;
    for m in NUMERIC_RUN.find_iter(token) {
        if !stands_alone(token, &m) {
            continue;
        }
        out.push_str(&token[last..m.start()]);
        match mode {
            Mode::Collapse => out.push('*'),
            Mode::PreserveSeparators => out.push_str(&DIGITS.replace_all(m.as_str(), "*")),
        }
        last = m.end();
    }
    out.push_str(&token[last..]);
    out
}

fn stands_alone(token: &str, m: &Match<'_>) -> bool {
    let before = &token[..m.start()];
    let prefix_len = before
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphanumeric())
        .count();
    let prefix = &before[before.len() - prefix_len..];
    prefix.is_empty() || prefix.eq_ignore_ascii_case("v")
}

/// 8-digit dates and hex hashes (8+ characters with at least one digit)
fn volatile_words(token: &str) -> String {
    ALNUM_WORD
        .replace_all(token, |caps: &regex::Captures<'_>| {
            let word = &caps[0];
            if is_volatile_word(word) {
                "*".to_string()
            } else {
                word.to_string()
            }
        })
        .into_owned()
}

fn is_volatile_word(word: &str) -> bool {
    word.len() >= 8
        && word.chars().all(|c| c.is_ascii_hexdigit())
        && word.chars().any(|c| c.is_ascii_digit())
}

fn collapse_stars(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        if c == '*' && out.ends_with('*') {
            continue;
        }
        out.push(c);
    }
    out
}
