// src/generalize/mod.rs

//! Turning rule candidates into sudoers-ready command patterns
//!
//! A candidate's observed argument lists are merged position by position
//! into one pattern when that is safe, otherwise each observation becomes
//! its own rule. Volatile parts (versions, dates, hashes) are wildcarded
//! either way so rules survive upgrades.
//!
//! Safety rules:
//! - a bare `*` never stands for a top-level directory (`/*`, `/opt/*`) and a
//!   token is never reduced to `*` alone
//! - a merged wildcard never ends a token and never spans paths of different
//!   depth, since a sudoers `*` also matches `/`; the observations are kept
//!   apart instead
//! - observed text containing sudoers glob characters is kept literal
//! - a single observation whose only wildcard form has a bare final segment
//!   on a destructive command is emitted with a risk flag
//!
//! Every line produced matches at least one observation of its own package.

mod volatile;

pub use volatile::{Mode, normalize, normalize_owner};

use crate::miner::{CandidateRule, MineResult, PackageCandidates};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Commands whose path arguments name something they destroy or take over
const DESTRUCTIVE_COMMANDS: &[&str] = &[
    "rm", "rmdir", "unlink", "mv", "chown", "chmod", "chgrp", "chflags",
];

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:[.,_][0-9]+)*").unwrap());

/// Residual risk carried by an emitted rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskFlag {
    /// A wildcard is the entire final path segment of a destructive command
    BroadFinalSegment,
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BroadFinalSegment => {
                f.write_str("wildcard covers a whole final path segment of a destructive command")
            }
        }
    }
}

/// Characters sudoers interprets as glob syntax in a command line
pub const GLOB_CHARS: &[char] = &['*', '?', '[', ']'];

/// A command path or argument in a rule
///
/// `Glob` text came from observations free of glob characters, so each `*`
/// in it is a wildcard put there by generalization. `Literal` text contains
/// glob characters of its own and must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Glob(String),
    Literal(String),
}

impl Pattern {
    /// The observed token, matched exactly
    pub fn literal(raw: &str) -> Self {
        if raw.contains(GLOB_CHARS) {
            Self::Literal(raw.to_string())
        } else {
            Self::Glob(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Glob(text) | Self::Literal(text) => text,
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Glob(pattern) => glob_match(pattern, text),
            Self::Literal(literal) => literal == text,
        }
    }
}

/// One generalized command pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleLine {
    pub command: Pattern,
    /// Empty means the command was observed without arguments
    pub args: Vec<Pattern>,
    pub flags: Vec<RiskFlag>,
    /// Distinct observations this line covers
    pub evidence: usize,
}

impl RuleLine {
    /// Whether an observed invocation falls under this pattern
    pub fn matches(&self, command: &str, args: &[String]) -> bool {
        self.args.len() == args.len()
            && self.command.matches(command)
            && self.args.iter().zip(args).all(|(p, a)| p.matches(a))
    }

    fn same_pattern(&self, other: &RuleLine) -> bool {
        self.command == other.command && self.args == other.args
    }

    fn add_flag(&mut self, flag: RiskFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }
}

/// Rules for one package, in first-observation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBlock {
    pub package: String,
    pub lines: Vec<RuleLine>,
}

impl RuleBlock {
    pub fn flagged(&self) -> usize {
        self.lines.iter().filter(|l| !l.flags.is_empty()).count()
    }
}

/// Per-package rule synthesis
#[derive(Debug, Clone, Default)]
pub struct RuleGeneralizer;

impl RuleGeneralizer {
    pub fn new() -> Self {
        Self
    }

    /// Generalize every mined package, keeping package order
    pub fn generalize_all(&self, mined: &MineResult) -> Vec<RuleBlock> {
        mined
            .packages
            .iter()
            .map(|PackageCandidates { package, candidates }| self.generalize(package, candidates))
            .collect()
    }

    pub fn generalize(&self, package: &str, candidates: &[CandidateRule]) -> RuleBlock {
        let mut lines: Vec<RuleLine> = Vec::new();
        for candidate in candidates {
            for line in self.generalize_candidate(candidate) {
                match lines.iter_mut().find(|l| l.same_pattern(&line)) {
                    Some(existing) => {
                        existing.evidence += line.evidence;
                        for flag in line.flags {
                            existing.add_flag(flag);
                        }
                    }
                    None => lines.push(line),
                }
            }
        }
        debug!("{}: {} rule line(s)", package, lines.len());
        RuleBlock {
            package: package.to_string(),
            lines,
        }
    }

    fn generalize_candidate(&self, candidate: &CandidateRule) -> Vec<RuleLine> {
        let command = command_pattern(&candidate.command);
        let destructive = is_destructive(&candidate.command);
        let chown = basename(&candidate.command) == "chown";

        let mut lines = if candidate.variants.len() > 1 {
            match merge_variants(&command, &candidate.variants, destructive, chown) {
                Some(line) => vec![line],
                None => {
                    debug!(
                        "Keeping {} observation(s) of {} apart",
                        candidate.variants.len(),
                        candidate.command
                    );
                    candidate
                        .variants
                        .iter()
                        .map(|args| single_line(&command, args, destructive, chown))
                        .collect()
                }
            }
        } else {
            candidate
                .variants
                .iter()
                .map(|args| single_line(&command, args, destructive, chown))
                .collect()
        };

        // Fall back to the literal observation for anything left uncovered
        for args in &candidate.variants {
            if !lines.iter().any(|l| l.matches(&candidate.command, args)) {
                warn!(
                    "Pattern for {} does not cover {:?}; emitting it literally",
                    candidate.command, args
                );
                lines.push(RuleLine {
                    command: Pattern::literal(&candidate.command),
                    args: args.iter().map(|a| Pattern::literal(a)).collect(),
                    flags: Vec::new(),
                    evidence: 1,
                });
            }
        }
        lines
    }
}

/// Command path with its volatile parts wildcarded, unless that is too broad
fn command_pattern(command: &str) -> Pattern {
    if command.contains(GLOB_CHARS) {
        return Pattern::literal(command);
    }
    let pattern = normalize(command, Mode::Collapse);
    if is_broad(&pattern) || final_segment_bare(&pattern) {
        Pattern::literal(command)
    } else {
        Pattern::Glob(pattern)
    }
}

/// One observation on its own
fn single_line(command: &Pattern, args: &[String], destructive: bool, chown: bool) -> RuleLine {
    let mut line = RuleLine {
        command: command.clone(),
        args: Vec::with_capacity(args.len()),
        flags: Vec::new(),
        evidence: 1,
    };
    for arg in args {
        let (token, flag) = single_token(arg, destructive, chown);
        line.args.push(token);
        if let Some(flag) = flag {
            line.add_flag(flag);
        }
    }
    line
}

fn single_token(raw: &str, destructive: bool, chown: bool) -> (Pattern, Option<RiskFlag>) {
    if raw.contains(GLOB_CHARS) {
        return (Pattern::literal(raw), None);
    }
    if chown && let Some(owner) = normalize_owner(raw) {
        return (Pattern::Glob(owner), None);
    }

    let collapsed = normalize(raw, Mode::Collapse);
    if collapsed == raw {
        return (Pattern::Glob(collapsed), None);
    }
    let introduces_bare_final =
        |pattern: &str| destructive && final_segment_bare(pattern) && !final_segment_bare(raw);
    if !is_broad(&collapsed) && !introduces_bare_final(&collapsed) {
        return (Pattern::Glob(collapsed), None);
    }

    let preserved = normalize(raw, Mode::PreserveSeparators);
    if is_broad(&preserved) {
        return (Pattern::literal(raw), None);
    }
    if introduces_bare_final(&preserved) {
        return (Pattern::Glob(preserved), Some(RiskFlag::BroadFinalSegment));
    }
    (Pattern::Glob(preserved), None)
}

/// Merge all observations of a candidate into one line, or `None` if the
/// merged pattern would be unsafe
fn merge_variants(command: &Pattern, variants: &[Vec<String>], destructive: bool, chown: bool) -> Option<RuleLine> {
    let width = variants.first()?.len();
    let mut line = RuleLine {
        command: command.clone(),
        args: Vec::with_capacity(width),
        flags: Vec::new(),
        evidence: variants.len(),
    };

    for pos in 0..width {
        let column: Vec<&str> = variants.iter().map(|v| v[pos].as_str()).collect();
        let first = column[0];

        if column.iter().all(|t| *t == first) {
            let (token, flag) = single_token(first, destructive, chown);
            line.args.push(token);
            if let Some(flag) = flag {
                line.add_flag(flag);
            }
            continue;
        }

        if column.iter().any(|t| t.contains(GLOB_CHARS)) {
            return None;
        }
        if chown && column.iter().all(|t| normalize_owner(t).is_some()) {
            line.args.push(Pattern::Glob("*:staff".to_string()));
            continue;
        }
        // Differing options change behavior, not just the target
        if column.iter().any(|t| t.starts_with('-')) {
            return None;
        }

        let pattern = normalize(&infer_column(&column)?, Mode::Collapse);
        let from_paths = column.iter().any(|t| t.starts_with('/'));
        if is_broad(&pattern)
            || (from_paths && !pattern.starts_with('/'))
            || pattern.ends_with('*')
            || final_segment_bare(&pattern)
        {
            return None;
        }
        line.args.push(Pattern::Glob(pattern));
    }

    Some(line)
}

/// Merge differing tokens at one argument position, or `None` when only a
/// wildcard spanning several path segments would cover them
fn infer_column(column: &[&str]) -> Option<String> {
    if let Some(pattern) = merge_numeric_runs(column) {
        return Some(pattern);
    }

    if column.iter().any(|t| t.starts_with('/')) {
        let segment_counts: Vec<usize> = column.iter().map(|t| t.split('/').count()).collect();
        if !column.iter().all(|t| t.starts_with('/'))
            || segment_counts.iter().any(|c| *c != segment_counts[0])
        {
            return None;
        }
        let split: Vec<Vec<&str>> = column.iter().map(|t| t.split('/').collect()).collect();
        let segments: Vec<String> = (0..segment_counts[0])
            .map(|i| {
                let parts: Vec<&str> = split.iter().map(|s| s[i]).collect();
                if parts.iter().all(|p| *p == parts[0]) {
                    parts[0].to_string()
                } else {
                    affix_wildcard(&parts)
                }
            })
            .collect();
        return Some(segments.join("/"));
    }

    Some(affix_wildcard(column))
}

/// Tokens that differ only in their digit runs: differing runs become `*`
fn merge_numeric_runs(column: &[&str]) -> Option<String> {
    let skeletons: Vec<String> = column
        .iter()
        .map(|t| DIGIT_RUN.replace_all(t, "\u{0}").into_owned())
        .collect();
    if skeletons.iter().any(|s| *s != skeletons[0]) {
        return None;
    }

    let runs: Vec<Vec<&str>> = column
        .iter()
        .map(|t| DIGIT_RUN.find_iter(t).map(|m| m.as_str()).collect())
        .collect();
    let mut pieces = skeletons[0].split('\u{0}');
    let mut out = pieces.next().unwrap_or_default().to_string();
    for (i, piece) in pieces.enumerate() {
        if runs.iter().all(|r| r[i] == runs[0][i]) {
            out.push_str(runs[0][i]);
        } else {
            out.push('*');
        }
        out.push_str(piece);
    }
    Some(out)
}

/// Common literal prefix + `*` + common literal suffix
fn affix_wildcard(tokens: &[&str]) -> String {
    let chars: Vec<Vec<char>> = tokens.iter().map(|t| t.chars().collect()).collect();
    let shortest = chars.iter().map(Vec::len).min().unwrap_or(0);

    let prefix = (0..shortest)
        .take_while(|&i| chars.iter().all(|c| c[i] == chars[0][i]))
        .count();
    let suffix = (0..shortest - prefix)
        .take_while(|&i| {
            let at = |c: &Vec<char>| c[c.len() - 1 - i];
            chars.iter().all(|c| at(c) == at(&chars[0]))
        })
        .count();

    let first = &chars[0];
    let mut out: String = first[..prefix].iter().collect();
    out.push('*');
    out.extend(&first[first.len() - suffix..]);
    out
}

/// A wildcard standing for too much: the whole token, or a top-level
/// directory entry with no literal start (`/*`, `/opt/*`, `/opt/*a`)
fn is_broad(token: &str) -> bool {
    if token.chars().all(|c| c == '*') {
        return true;
    }
    if token.starts_with("*/") {
        return true;
    }
    if let Some(rest) = token.strip_prefix('/') {
        return rest.split('/').take(2).any(|segment| segment.starts_with('*'));
    }
    false
}

fn final_segment_bare(token: &str) -> bool {
    let trimmed = token.trim_end_matches('/');
    trimmed.contains('/') && trimmed.rsplit('/').next() == Some("*")
}

fn basename(command: &str) -> &str {
    command.rsplit('/').next().unwrap_or(command)
}

fn is_destructive(command: &str) -> bool {
    DESTRUCTIVE_COMMANDS.contains(&basename(command))
}

/// `*` matches any run of characters, everything else matches itself
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
