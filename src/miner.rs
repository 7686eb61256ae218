// src/miner.rs

//! Grouping of trace entries into per-package rule candidates
//!
//! Mining is a pure function of the entries it is given: it groups by
//! package (first-appearance order), resolves each command to an absolute
//! path, and clusters observations of the same command with the same number
//! of arguments. Entries that cannot become a rule are counted, never fatal.

use crate::trace::{TraceEntry, TraceReadout};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, warn};

/// Directories searched for bare command names when `which` fails
const FALLBACK_DIRS: &[&str] = &["/usr/bin", "/bin", "/usr/sbin", "/sbin"];

/// Observations of one command with one argument count, within one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRule {
    pub package: String,
    /// Absolute command path
    pub command: String,
    /// Number of arguments (command excluded)
    pub token_count: usize,
    /// Distinct argument lists, first-seen order
    pub variants: Vec<Vec<String>>,
    /// Trace entries behind this candidate
    pub support: usize,
}

/// Candidates of one package, in first-appearance order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCandidates {
    pub package: String,
    pub candidates: Vec<CandidateRule>,
}

/// Why an entry produced no candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SkipReason {
    /// No command at all
    EmptyCommand,
    /// Backticks, whitespace or a relative path in the command
    ImplausibleCommand,
    /// Bare name not found on PATH or in the system directories
    UnresolvedCommand,
    /// An empty argument, which a sudoers command line cannot express
    EmptyArgument,
    /// Trace line failed its checksum or did not parse
    CorruptLine,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EmptyCommand => "empty command",
            Self::ImplausibleCommand => "implausible command",
            Self::UnresolvedCommand => "unresolvable command",
            Self::EmptyArgument => "empty argument",
            Self::CorruptLine => "corrupt trace line",
        };
        f.write_str(s)
    }
}

/// Per-reason counts of skipped entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipReport {
    counts: BTreeMap<SkipReason, usize>,
}

impl SkipReport {
    pub fn add(&mut self, reason: SkipReason, count: usize) {
        if count > 0 {
            *self.counts.entry(reason).or_insert(0) += count;
        }
    }

    pub fn get(&self, reason: SkipReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SkipReason, usize)> + '_ {
        self.counts.iter().map(|(r, c)| (*r, *c))
    }
}

/// Everything mined from a set of trace logs
#[derive(Debug, Clone, Default)]
pub struct MineResult {
    pub packages: Vec<PackageCandidates>,
    pub skipped: SkipReport,
    /// Filter entries with no trace entries
    pub missing: Vec<String>,
    /// Valid entries read
    pub entries: usize,
}

/// Maps a bare command name to an absolute executable path
pub trait CommandResolver {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// Resolution against PATH, then the standard system directories
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl CommandResolver for SystemResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        if let Ok(path) = which::which(name) {
            return Some(path.to_string_lossy().into_owned());
        }
        FALLBACK_DIRS
            .iter()
            .map(|dir| Path::new(dir).join(name))
            .find(|candidate| is_executable(candidate))
            .map(|p| p.to_string_lossy().into_owned())
    }
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Groups trace entries into candidates
pub struct LogMiner {
    resolver: Box<dyn CommandResolver>,
    filter: Option<Vec<String>>,
}

impl Default for LogMiner {
    fn default() -> Self {
        Self::new()
    }
}

impl LogMiner {
    pub fn new() -> Self {
        Self {
            resolver: Box::new(SystemResolver),
            filter: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn CommandResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Only mine these packages, emitted in this order
    pub fn with_filter(mut self, packages: Vec<String>) -> Self {
        self.filter = Some(packages);
        self
    }

    pub fn mine(&self, readout: &TraceReadout) -> MineResult {
        let mut result = MineResult {
            entries: readout.entries.len(),
            ..Default::default()
        };
        result.skipped.add(SkipReason::CorruptLine, readout.corrupt_lines);

        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<&TraceEntry>> = HashMap::new();
        for entry in &readout.entries {
            if !grouped.contains_key(&entry.package) {
                order.push(entry.package.clone());
            }
            grouped.entry(entry.package.clone()).or_default().push(entry);
        }

        let selected = match &self.filter {
            Some(filter) => {
                for package in filter {
                    if !grouped.contains_key(package) {
                        warn!("No trace entries for {}", package);
                        result.missing.push(package.clone());
                    }
                }
                filter.clone()
            }
            None => order,
        };

        for package in selected {
            let Some(entries) = grouped.get(&package) else {
                continue;
            };
            let candidates = self.cluster(&package, entries, &mut result.skipped);
            debug!("{}: {} candidate(s) from {} entries", package, candidates.len(), entries.len());
            result.packages.push(PackageCandidates { package, candidates });
        }

        result
    }

    fn cluster(&self, package: &str, entries: &[&TraceEntry], skipped: &mut SkipReport) -> Vec<CandidateRule> {
        let mut candidates: Vec<CandidateRule> = Vec::new();

        for entry in entries {
            let Some((first, args)) = entry.argv.split_first() else {
                skipped.add(SkipReason::EmptyCommand, 1);
                continue;
            };
            let command = match self.resolve_command(first) {
                Ok(command) => command,
                Err(reason) => {
                    debug!("Skipping {:?} for {}: {}", entry.argv, package, reason);
                    skipped.add(reason, 1);
                    continue;
                }
            };

            if args.iter().any(String::is_empty) {
                debug!("Skipping {:?} for {}: empty argument", entry.argv, package);
                skipped.add(SkipReason::EmptyArgument, 1);
                continue;
            }

            let existing = candidates
                .iter()
                .position(|c| c.command == command && c.token_count == args.len());
            let idx = match existing {
                Some(idx) => idx,
                None => {
                    candidates.push(CandidateRule {
                        package: package.to_string(),
                        command,
                        token_count: args.len(),
                        variants: Vec::new(),
                        support: 0,
                    });
                    candidates.len() - 1
                }
            };
            let candidate = &mut candidates[idx];
            candidate.support += 1;
            if !candidate.variants.iter().any(|v| v.as_slice() == args) {
                candidate.variants.push(args.to_vec());
            }
        }

        candidates
    }

    fn resolve_command(&self, command: &str) -> Result<String, SkipReason> {
        if command.is_empty() {
            return Err(SkipReason::EmptyCommand);
        }
        if command.contains('`') || command.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SkipReason::ImplausibleCommand);
        }
        if command.starts_with('/') {
            return Ok(command.to_string());
        }
        if command.contains('/') {
            return Err(SkipReason::ImplausibleCommand);
        }
        self.resolver
            .resolve(command)
            .ok_or(SkipReason::UnresolvedCommand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    struct MapResolver(Vec<(&'static str, &'static str)>);

    impl CommandResolver for MapResolver {
        fn resolve(&self, name: &str) -> Option<String> {
            self.0.iter().find(|(n, _)| *n == name).map(|(_, p)| p.to_string())
        }
    }

    fn entry(seq: u64, package: &str, argv: &[&str]) -> TraceEntry {
        TraceEntry {
            seq,
            package: package.to_string(),
            attempt: Uuid::nil(),
            timestamp: Utc::now(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn miner() -> LogMiner {
        LogMiner::new().with_resolver(Box::new(MapResolver(vec![("rm", "/bin/rm")])))
    }

    #[test]
    fn test_groups_in_first_appearance_order() {
        let readout = TraceReadout {
            entries: vec![
                entry(1, "beta", &["/bin/rm", "-f", "/tmp/b"]),
                entry(2, "alpha", &["/bin/rm", "-f", "/tmp/a"]),
                entry(3, "beta", &["/usr/sbin/installer", "-pkg", "b.pkg", "-target", "/"]),
            ],
            corrupt_lines: 0,
        };
        let result = miner().mine(&readout);
        let packages: Vec<_> = result.packages.iter().map(|p| p.package.as_str()).collect();
        assert_eq!(packages, vec!["beta", "alpha"]);
        assert_eq!(result.packages[0].candidates.len(), 2);
        assert_eq!(result.entries, 3);
    }

    #[test]
    fn test_clusters_by_command_and_arity() {
        let readout = TraceReadout {
            entries: vec![
                entry(1, "app", &["/bin/rm", "-rf", "/opt/app-1.2.3/bin/helper"]),
                entry(2, "app", &["/bin/rm", "-rf", "/opt/app-1.3.0/bin/helper"]),
                entry(3, "app", &["/bin/rm", "-rf", "/opt/app-1.3.0/bin/helper"]),
                entry(4, "app", &["/bin/rm", "/tmp/x"]),
            ],
            corrupt_lines: 0,
        };
        let result = miner().mine(&readout);
        let candidates = &result.packages[0].candidates;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].variants.len(), 2);
        assert_eq!(candidates[0].support, 3);
        assert_eq!(candidates[1].token_count, 1);
    }

    #[test]
    fn test_skip_reasons_counted() {
        let readout = TraceReadout {
            entries: vec![
                entry(1, "app", &[]),
                entry(2, "app", &["`date`", "x"]),
                entry(3, "app", &["nosuchtool-xyz", "x"]),
                entry(4, "app", &["./relative", "x"]),
                entry(5, "app", &["rm", "-f", "/tmp/x"]),
                entry(6, "app", &["/bin/rm", "", "/tmp/x"]),
            ],
            corrupt_lines: 2,
        };
        let result = miner().mine(&readout);
        assert_eq!(result.skipped.get(SkipReason::EmptyCommand), 1);
        assert_eq!(result.skipped.get(SkipReason::ImplausibleCommand), 2);
        assert_eq!(result.skipped.get(SkipReason::UnresolvedCommand), 1);
        assert_eq!(result.skipped.get(SkipReason::EmptyArgument), 1);
        assert_eq!(result.skipped.get(SkipReason::CorruptLine), 2);
        assert_eq!(result.skipped.total(), 7);
        assert_eq!(result.packages[0].candidates[0].command, "/bin/rm");
    }

    #[test]
    fn test_filter_order_and_missing() {
        let readout = TraceReadout {
            entries: vec![
                entry(1, "alpha", &["/bin/rm", "a"]),
                entry(2, "beta", &["/bin/rm", "b"]),
            ],
            corrupt_lines: 0,
        };
        let result = miner()
            .with_filter(vec!["beta".into(), "ghost".into(), "alpha".into()])
            .mine(&readout);
        let packages: Vec<_> = result.packages.iter().map(|p| p.package.as_str()).collect();
        assert_eq!(packages, vec!["beta", "alpha"]);
        assert_eq!(result.missing, vec!["ghost"]);
    }
}
