// src/catalog.rs

//! Package selection and inventory
//!
//! A run targets either an explicit list of cask tokens or every cask the
//! package manager reports as installed. Explicit lists keep the operator's
//! order; the inventory keeps the package manager's order.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::process::{Command, Stdio};
use tracing::debug;

/// Which packages a run covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every installed cask
    All,
    /// An explicit, ordered, duplicate-free list
    Explicit(Vec<String>),
}

impl Selection {
    /// Build a selection from positional arguments, falling back to a
    /// whitespace-separated list (the `CASKS` variable). Nothing given means
    /// the full inventory.
    pub fn from_sources(args: &[String], env_list: Option<&str>) -> Result<Self> {
        let tokens: Vec<String> = if !args.is_empty() {
            args.iter().flat_map(|a| a.split_whitespace()).map(str::to_string).collect()
        } else {
            env_list
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };

        if tokens.is_empty() {
            return Ok(Self::All);
        }

        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(tokens.len());
        for token in tokens {
            validate_package_id(&token)?;
            if seen.insert(token.clone()) {
                ids.push(token);
            }
        }
        Ok(Self::Explicit(ids))
    }

    /// The scope marker persisted with a checkpoint
    pub fn scope(&self) -> RunScope {
        match self {
            Self::All => RunScope::All,
            Self::Explicit(ids) => {
                let mut sorted = ids.clone();
                sorted.sort();
                RunScope::Explicit { packages: sorted }
            }
        }
    }

    /// Resolve the ordered package list for this run
    pub fn resolve(&self, catalog: &dyn PackageCatalog) -> Result<Vec<String>> {
        match self {
            Self::Explicit(ids) => Ok(ids.clone()),
            Self::All => catalog.installed_packages(),
        }
    }
}

/// Selection filter recorded in the checkpoint
///
/// Explicit sets are stored sorted so that the same set given in a different
/// order still resumes the same document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunScope {
    All,
    Explicit { packages: Vec<String> },
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all installed casks"),
            Self::Explicit { packages } => write!(f, "{}", packages.join(" ")),
        }
    }
}

/// Check that a cask token is usable as a record key and a command argument
pub fn validate_package_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('-')
        && !id.chars().any(|c| c.is_whitespace() || c.is_control() || c == '/');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidPackageId(id.to_string()))
    }
}

/// Source of the installed package inventory
pub trait PackageCatalog {
    /// Installed cask tokens in the package manager's order
    fn installed_packages(&self) -> Result<Vec<String>>;
}

/// Inventory backed by `brew list --cask`
#[derive(Debug, Clone)]
pub struct BrewCatalog {
    brew: String,
}

impl BrewCatalog {
    pub fn new(brew: impl Into<String>) -> Self {
        Self { brew: brew.into() }
    }
}

impl PackageCatalog for BrewCatalog {
    fn installed_packages(&self) -> Result<Vec<String>> {
        debug!("Querying inventory: {} list --cask", self.brew);
        let output = Command::new(&self.brew)
            .args(["list", "--cask"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Inventory(format!("failed to run {}: {}", self.brew, e)))?;

        if !output.status.success() {
            return Err(Error::Inventory(format!(
                "{} list --cask exited with {}: {}",
                self.brew,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_inventory(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `brew list --cask` output, one token per line
pub fn parse_inventory(stdout: &str) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        validate_package_id(line)?;
        if seen.insert(line.to_string()) {
            ids.push(line.to_string());
        }
    }
    Ok(ids)
}
