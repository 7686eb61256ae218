// src/trace.rs

//! Append-only trace of privileged commands attempted during reinstalls
//!
//! Each entry is written as a single line with a CRC32 checksum so that a
//! reader can tell a torn or edited line from a valid one.
//!
//! Format: `{crc32_hex}|{json}\n`
//!
//! Every record is flushed and fsynced before `record` returns: a crash can
//! lose at most the entry being written, never an earlier one.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Fixed trace log filename inside the working directory
pub const TRACE_FILE: &str = "reinstall_casks_trace.log";

/// One privileged command observed during a reinstall attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Arrival order across the whole log
    pub seq: u64,
    /// Package whose reinstall attempted the command
    pub package: String,
    /// Reinstall attempt that produced it
    pub attempt: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Command path followed by its arguments
    pub argv: Vec<String>,
}

/// Writer side of the trace log
pub struct TraceRecorder {
    path: PathBuf,
    file: File,
    sequence: u64,
}

impl TraceRecorder {
    /// Open (or create) the log for appending, continuing its sequence
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let sequence = if path.exists() {
            let readout = read_trace(path)?;
            readout.entries.iter().map(|e| e.seq).max().unwrap_or(0)
        } else {
            0
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        // Terminate a torn last line so the next record starts on its own
        if ends_torn(path)? {
            warn!("Trace log {} ends mid-line; terminating it", path.display());
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        debug!("Trace log {} open at sequence {}", path.display(), sequence);

        Ok(Self {
            path: path.to_path_buf(),
            file,
            sequence,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number of the last entry written
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Append one entry durably
    pub fn record(&mut self, package: &str, attempt: Uuid, argv: Vec<String>) -> Result<TraceEntry> {
        let entry = TraceEntry {
            seq: self.sequence + 1,
            package: package.to_string(),
            attempt,
            timestamp: Utc::now(),
            argv,
        };
        let json = serde_json::to_string(&entry)?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json)?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.sequence = entry.seq;
        Ok(entry)
    }
}

/// Entries read back from a trace log, with the lines that were rejected
#[derive(Debug, Clone, Default)]
pub struct TraceReadout {
    pub entries: Vec<TraceEntry>,
    /// Lines with a bad delimiter, checksum or payload
    pub corrupt_lines: usize,
}

impl TraceReadout {
    /// Concatenate readouts from several logs, keeping file order
    pub fn merge(readouts: impl IntoIterator<Item = TraceReadout>) -> Self {
        readouts.into_iter().fold(Self::default(), |mut acc, r| {
            acc.entries.extend(r.entries);
            acc.corrupt_lines += r.corrupt_lines;
            acc
        })
    }
}

/// Read every valid entry of a trace log
///
/// Unlike a transaction journal, a bad line does not end the read: the log is
/// evidence, and entries after a damaged line are still genuine.
pub fn read_trace(path: &Path) -> Result<TraceReadout> {
    let file = File::open(path).map_err(|e| Error::TraceUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut readout = TraceReadout::default();
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut line_num = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_num += 1;

        let parsed = std::str::from_utf8(&buf)
            .map_err(|_| "not valid UTF-8".to_string())
            .and_then(|line| {
                let line = line.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    Ok(None)
                } else {
                    parse_line(line).map(Some)
                }
            });
        match parsed {
            Ok(Some(entry)) => readout.entries.push(entry),
            Ok(None) => {}
            Err(reason) => {
                warn!("{}:{}: skipping trace line: {}", path.display(), line_num, reason);
                readout.corrupt_lines += 1;
            }
        }
    }

    Ok(readout)
}

/// Whether a non-empty file stops mid-line, as after a crash during a write
fn ends_torn(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn parse_line(line: &str) -> std::result::Result<TraceEntry, String> {
    let (crc_hex, json) = line
        .split_once('|')
        .ok_or_else(|| "missing delimiter".to_string())?;
    let expected = u32::from_str_radix(crc_hex, 16).map_err(|_| format!("invalid CRC32 {crc_hex}"))?;
    let actual = crc32fast::hash(json.as_bytes());
    if expected != actual {
        return Err(format!("CRC mismatch: expected {:08x}, got {:08x}", expected, actual));
    }
    serde_json::from_str(json).map_err(|e| format!("invalid record: {e}"))
}
