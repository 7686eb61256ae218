// src/error.rs

//! Error types shared by the reinstall batch and the rule generator

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the caskgrant library
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to replace {0}: {1}")]
    Replace(PathBuf, #[source] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid package identifier '{0}'")]
    InvalidPackageId(String),

    #[error("Package inventory unavailable: {0}")]
    Inventory(String),

    #[error("Reinstall action failed: {0}")]
    ActionError(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Working directory {} is locked by another run", .0.display())]
    Locked(PathBuf),

    #[error("Trace log not readable: {}: {reason}", path.display())]
    TraceUnreadable { path: PathBuf, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(&'static str),
}

/// Result alias for library operations
pub type Result<T> = std::result::Result<T, Error>;
