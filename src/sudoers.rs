// src/sudoers.rs

//! Rendering rule blocks as a sudoers fragment
//!
//! Each package gets its own delimited block so a regenerated subset can be
//! spliced into an existing file by hand. The whole document is built in
//! memory and written with a single atomic rename.

use crate::error::Result;
use crate::fsutil::atomic_write;
use crate::generalize::{GLOB_CHARS, Pattern, RuleBlock, RuleLine};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Output path used when none is configured
pub const DEFAULT_OUTPUT: &str = "./homebrew-cask.nopasswd.sudoers";

/// Renders and writes the sudoers fragment
#[derive(Debug, Clone)]
pub struct SudoersWriter {
    target_user: String,
    sources: Vec<PathBuf>,
    generated_at: DateTime<Utc>,
}

impl SudoersWriter {
    pub fn new(target_user: impl Into<String>) -> Self {
        Self {
            target_user: target_user.into(),
            sources: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    /// Trace logs named in the header
    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = at;
        self
    }

    pub fn render(&self, blocks: &[RuleBlock]) -> String {
        let mut doc = String::new();
        let _ = writeln!(doc, "# Generated by caskgrant {}", env!("CARGO_PKG_VERSION"));
        let _ = writeln!(doc, "# Generated at: {}", self.generated_at.to_rfc3339());
        let _ = writeln!(doc, "# Target user: {}", self.target_user);
        for source in &self.sources {
            let _ = writeln!(doc, "# Source trace: {}", source.display());
        }
        let _ = writeln!(doc, "# Rules are per cask and only cover commands observed in the trace.");

        for block in blocks {
            doc.push('\n');
            let _ = writeln!(doc, "# ---- cask: {} ----", block.package);
            if block.lines.is_empty() {
                doc.push_str("# No privileged commands observed\n");
            }
            for line in &block.lines {
                for flag in &line.flags {
                    let _ = writeln!(doc, "# REVIEW: {}", flag);
                }
                doc.push_str(&self.rule_line(line));
                doc.push('\n');
            }
            let _ = writeln!(doc, "# ---- end: {} ----", block.package);
        }

        doc
    }

    /// `<user> ALL=(ALL) NOPASSWD: <command> <args...>`
    ///
    /// A line without arguments ends in `""`; sudoers reads a bare command as
    /// permission to pass any arguments.
    pub fn rule_line(&self, line: &RuleLine) -> String {
        let mut out = format!(
            "{} ALL=(ALL) NOPASSWD: {}",
            sudo_escape(&self.target_user),
            render_pattern(&line.command)
        );
        if line.args.is_empty() {
            out.push_str(" \"\"");
        }
        for arg in &line.args {
            out.push(' ');
            out.push_str(&render_pattern(arg));
        }
        out
    }

    /// Render and replace `path` atomically
    pub fn write(&self, path: &Path, blocks: &[RuleBlock]) -> Result<()> {
        let doc = self.render(blocks);
        atomic_write(path, doc.as_bytes())?;
        info!("Wrote {} block(s) to {}", blocks.len(), path.display());
        Ok(())
    }
}

/// Backslash-escape characters sudoers treats specially; `*` stays a wildcard
pub fn sudo_escape(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    for c in token.chars() {
        if matches!(c, '\\' | ',' | ':' | '=') || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape a pattern, keeping `*` live only where generalization put it
fn render_pattern(pattern: &Pattern) -> String {
    match pattern {
        Pattern::Glob(text) => sudo_escape(text),
        Pattern::Literal(text) => {
            let escaped = sudo_escape(text);
            let mut out = String::with_capacity(escaped.len());
            for c in escaped.chars() {
                if GLOB_CHARS.contains(&c) {
                    out.push('\\');
                }
                out.push(c);
            }
            out
        }
    }
}
