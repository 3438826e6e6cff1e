//! Append-only findings journal.
//!
//! One JSON object per line. Each entry carries the SHA-256 of its own
//! content and the hash of the previous entry, so edits and deletions inside
//! a generation are detectable. Files rotate by size, keeping
//! `MAX_ROTATIONS` older generations; each generation starts a new chain.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use integra_core::{ReportSink, Severity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MAX_ROTATIONS: usize = 5;
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;

const CHAIN_START: &str = "CHAIN_START";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Debug)]
struct JournalState {
    last_seq: u64,
    last_hash: String,
}

pub struct Journal {
    path: PathBuf,
    inner: Mutex<JournalState>,
    max_bytes: u64,
}

impl Journal {
    /// Opens the journal at `path`. A last line cut short by a crash moves
    /// the damaged file into the rotation and a new chain begins.
    pub fn open<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let (entries, torn) = read_entries(&path)?;
        let last_seq = entries.last().map_or(0, |e| e.seq);
        let last_hash = match entries.last() {
            Some(entry) if !torn => entry.hash.clone(),
            _ => CHAIN_START.to_string(),
        };
        if torn {
            warn!(path = %path.display(), "journal ends in an incomplete entry; starting a new chain");
            shift_generations(&path)?;
        }
        Ok(Self {
            path,
            inner: Mutex::new(JournalState {
                last_seq,
                last_hash,
            }),
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compute_hash(entry_without_hash: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(entry_without_hash.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    fn unhashed(entry: &JournalEntry) -> serde_json::Value {
        serde_json::json!({
            "seq": entry.seq,
            "timestamp": entry.timestamp,
            "severity": entry.severity,
            "message": entry.message,
            "prev_hash": entry.prev_hash,
        })
    }

    pub fn append(&self, severity: Severity, message: &str) -> Result<JournalEntry> {
        let mut state = self.inner.lock();
        self.rotate_if_needed(&mut state)?;

        let mut entry = JournalEntry {
            seq: state.last_seq + 1,
            timestamp: Utc::now(),
            severity,
            message: message.to_string(),
            prev_hash: state.last_hash.clone(),
            hash: String::new(),
        };
        entry.hash = Self::compute_hash(&Self::unhashed(&entry));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        file.flush()?;

        state.last_seq = entry.seq;
        state.last_hash = entry.hash.clone();
        Ok(entry)
    }

    fn rotate_if_needed(&self, state: &mut JournalState) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(metadata) if metadata.len() >= self.max_bytes => {}
            _ => return Ok(()),
        }
        shift_generations(&self.path)?;
        // sequence numbers stay monotonic across generations
        state.last_hash = CHAIN_START.to_string();
        Ok(())
    }

    /// Most recent entries of the current generation, newest first.
    pub fn read_recent(&self, limit: Option<usize>) -> Result<Vec<JournalEntry>> {
        let (mut entries, _) = read_entries(&self.path)?;
        entries.reverse();
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// Checks every link of the current generation's chain.
    pub fn verify_chain(&self) -> Result<usize> {
        let (entries, _) = read_entries(&self.path)?;
        let mut prev = CHAIN_START.to_string();
        for entry in &entries {
            if entry.prev_hash != prev {
                bail!("journal chain broken before entry {}", entry.seq);
            }
            if Self::compute_hash(&Self::unhashed(entry)) != entry.hash {
                bail!("journal entry {} was modified", entry.seq);
            }
            prev = entry.hash.clone();
        }
        Ok(entries.len())
    }
}

/// Parsed entries, plus whether the last line could not be parsed. Any
/// other unparsable line is an error.
fn read_entries(path: &Path) -> Result<(Vec<JournalEntry>, bool)> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((vec![], false)),
        Err(e) => return Err(e.into()),
    };
    let lines: Vec<&[u8]> = bytes
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .collect();

    let mut entries = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_slice(line) {
            Ok(entry) => entries.push(entry),
            Err(e) if i + 1 == lines.len() => {
                warn!(path = %path.display(), error = %e, "ignoring incomplete journal line");
                return Ok((entries, true));
            }
            Err(e) => {
                return Err(anyhow!(e).context(format!("journal entry {} is corrupt", i + 1)))
            }
        }
    }
    Ok((entries, false))
}

/// Moves `path` to `path.1`, shifting older generations up and dropping
/// the oldest.
fn shift_generations(path: &Path) -> Result<()> {
    for i in (1..=MAX_ROTATIONS).rev() {
        let rotated = path_with_suffix(path, i);
        if rotated.exists() {
            if i == MAX_ROTATIONS {
                fs::remove_file(&rotated)?;
            } else {
                fs::rename(&rotated, path_with_suffix(path, i + 1))?;
            }
        }
    }
    fs::rename(path, path_with_suffix(path, 1))?;
    Ok(())
}

fn path_with_suffix(path: &Path, index: usize) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{index}"));
    path.with_file_name(name)
}

impl ReportSink for Journal {
    fn report(&self, severity: Severity, message: &str) {
        if let Err(e) = self.append(severity, message) {
            warn!(path = %self.path.display(), error = %e, "failed to write journal entry");
        }
    }
}
