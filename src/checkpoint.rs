// src/checkpoint.rs

//! Per-package progress persisted across interrupted runs
//!
//! The checkpoint is a single JSON document in the working directory. It is
//! rewritten atomically after every state transition, so after a crash it
//! always reflects the last completed transition: a package that was being
//! reinstalled shows `in_progress` and is retried on the next run.
//!
//! A document is only resumed when its run scope matches the current
//! selection. A document for another scope is set aside under a name derived
//! from its scope and picked up again when that scope comes back. An
//! unparsable document is moved to `.corrupt`; nothing is repaired in place.

use crate::catalog::RunScope;
use crate::error::Result;
use crate::fsutil::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fixed checkpoint filename inside the working directory
pub const CHECKPOINT_FILE: &str = "reinstall_casks_state.json";

/// Current document format
pub const CHECKPOINT_VERSION: u32 = 1;

/// Reinstall status of one package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl PackageStatus {
    /// Whether a run should (re)attempt a package in this state
    pub fn needs_attempt(&self) -> bool {
        !matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted state of one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub id: String,
    pub status: PackageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    /// Set once the download phase fetched the installer
    #[serde(default)]
    pub fetched: bool,
}

impl PackageRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: PackageStatus::Pending,
            last_attempt: None,
            failure_reason: None,
            attempts: 0,
            fetched: false,
        }
    }

    pub fn mark_in_progress(&mut self, at: DateTime<Utc>) {
        self.status = PackageStatus::InProgress;
        self.last_attempt = Some(at);
        self.attempts += 1;
    }

    pub fn mark_succeeded(&mut self) {
        self.status = PackageStatus::Succeeded;
        self.failure_reason = None;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = PackageStatus::Failed;
        self.failure_reason = Some(reason.into());
    }
}

/// The whole checkpoint: run scope plus records in catalog order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub version: u32,
    pub scope: RunScope,
    pub packages: Vec<PackageRecord>,
}

impl CheckpointDocument {
    pub fn new(scope: RunScope) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            scope,
            packages: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&PackageRecord> {
        self.packages.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PackageRecord> {
        self.packages.iter_mut().find(|r| r.id == id)
    }

    /// Add a Pending record for every id not yet tracked, keeping order.
    /// Existing records are never removed.
    pub fn ensure_packages(&mut self, ids: &[String]) -> usize {
        let mut added = 0;
        for id in ids {
            if self.get(id).is_none() {
                self.packages.push(PackageRecord::new(id.clone()));
                added += 1;
            }
        }
        added
    }

    pub fn count(&self, status: PackageStatus) -> usize {
        self.packages.iter().filter(|r| r.status == status).count()
    }
}

/// How the store arrived at the document it handed out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No document existed
    Fresh,
    /// An existing document with a matching scope was resumed
    Resumed,
    /// A document set aside by an earlier run with this scope was put back
    Restored { from: PathBuf },
    /// A document with another scope was set aside at the given path
    ScopeChanged { previous: PathBuf },
    /// An unreadable document was moved to the given path
    Corrupt { moved_to: PathBuf, error: String },
}

/// Owner of the checkpoint file for one working directory
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(workdir: &Path) -> Self {
        Self {
            path: workdir.join(CHECKPOINT_FILE),
        }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a document with `scope` is kept while another scope is active
    pub fn set_aside_path(&self, scope: &RunScope) -> Result<PathBuf> {
        let key = crc32fast::hash(&serde_json::to_vec(scope)?);
        Ok(self.sibling(&format!("prev-{:08x}", key)))
    }

    /// Load the document for `scope`
    ///
    /// A document for another scope is set aside under a per-scope name, and
    /// a document set aside earlier for `scope` is resumed, so alternating
    /// between a broad and a narrow selection never loses progress.
    pub fn load_or_init(&self, scope: &RunScope) -> Result<(CheckpointDocument, LoadOutcome)> {
        if !self.path.exists() {
            debug!("No checkpoint at {}", self.path.display());
            if let Some((doc, from)) = self.restore(scope)? {
                return Ok((doc, LoadOutcome::Restored { from }));
            }
            return Ok((CheckpointDocument::new(scope.clone()), LoadOutcome::Fresh));
        }

        match read_document(&self.path) {
            Ok(doc) if &doc.scope == scope => {
                info!(
                    "Resuming checkpoint: {} succeeded, {} remaining",
                    doc.count(PackageStatus::Succeeded),
                    doc.packages.len() - doc.count(PackageStatus::Succeeded)
                );
                Ok((doc, LoadOutcome::Resumed))
            }
            Ok(doc) => {
                let previous = self.set_aside_path(&doc.scope)?;
                warn!(
                    "Checkpoint scope ({}) differs from this run ({}); keeping it as {}",
                    doc.scope,
                    scope,
                    previous.display()
                );
                fs::rename(&self.path, &previous)?;
                if let Some((doc, from)) = self.restore(scope)? {
                    return Ok((doc, LoadOutcome::Restored { from }));
                }
                Ok((
                    CheckpointDocument::new(scope.clone()),
                    LoadOutcome::ScopeChanged { previous },
                ))
            }
            Err(error) => {
                let moved_to = self.sibling("corrupt");
                warn!(
                    "Checkpoint {} is unreadable ({}); starting fresh",
                    self.path.display(),
                    error
                );
                fs::rename(&self.path, &moved_to)?;
                Ok((
                    CheckpointDocument::new(scope.clone()),
                    LoadOutcome::Corrupt { moved_to, error },
                ))
            }
        }
    }

    /// Put back the document set aside for `scope`, if there is a usable one
    fn restore(&self, scope: &RunScope) -> Result<Option<(CheckpointDocument, PathBuf)>> {
        let from = self.set_aside_path(scope)?;
        if !from.exists() {
            return Ok(None);
        }
        match read_document(&from) {
            Ok(doc) if &doc.scope == scope => {
                info!(
                    "Resuming checkpoint set aside at {}: {} succeeded",
                    from.display(),
                    doc.count(PackageStatus::Succeeded)
                );
                fs::rename(&from, &self.path)?;
                Ok(Some((doc, from)))
            }
            Ok(_) => {
                warn!("{} belongs to another selection; ignoring it", from.display());
                Ok(None)
            }
            Err(error) => {
                warn!("{} is unreadable ({}); ignoring it", from.display(), error);
                Ok(None)
            }
        }
    }

    /// Persist the document (write-new-then-rename)
    pub fn save(&self, doc: &CheckpointDocument) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(doc)?;
        json.push(b'\n');
        atomic_write(&self.path, &json)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| CHECKPOINT_FILE.into());
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

fn read_document(path: &Path) -> std::result::Result<CheckpointDocument, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let doc: CheckpointDocument = serde_json::from_str(&text).map_err(|e| e.to_string())?;
    if doc.version != CHECKPOINT_VERSION {
        return Err(format!(
            "unsupported checkpoint version {} (expected {})",
            doc.version, CHECKPOINT_VERSION
        ));
    }
    Ok(doc)
}
