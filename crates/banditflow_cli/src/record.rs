//! Checkpoint file.
//!
//! JSON Lines: the first line is the run header, every following line a
//! complete snapshot. Each record is serialised in memory and written with
//! a single `write_all` followed by a flush and `sync_data`, so a reader
//! that ignores an unterminated last line always sees whole records.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct RecordWriter {
    path: PathBuf,
    file: File,
    snapshots: usize,
}

impl RecordWriter {
    /// Creates (or truncates) `path` and writes the header record. The file
    /// is removed again if the header cannot be written.
    pub fn create(path: &Path, header: &impl Serialize) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create record file {}", path.display()))?;
        let mut writer = Self {
            path: path.to_path_buf(),
            file,
            snapshots: 0,
        };
        if let Err(err) = writer.write_line(header) {
            if let Err(cleanup) = writer.discard() {
                warn!(error = %cleanup, "partial record file left behind");
            }
            return Err(err.context("Failed to write run header"));
        }
        Ok(writer)
    }

    pub fn append(&mut self, record: &impl Serialize) -> Result<()> {
        self.write_line(record)
            .with_context(|| format!("Failed to append snapshot {}", self.snapshots + 1))?;
        self.snapshots += 1;
        Ok(())
    }

    /// Number of snapshots durably written so far.
    pub fn snapshots(&self) -> usize {
        self.snapshots
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file; used when a run fails before its first snapshot.
    pub fn discard(self) -> Result<()> {
        let Self { path, file, .. } = self;
        drop(file);
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove record file {}", path.display()))
    }

    fn write_line(&mut self, value: &impl Serialize) -> Result<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Complete records of a checkpoint file in append order.
pub fn read_records(path: &Path) -> Result<Vec<Value>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read record file {}", path.display()))?;
    let complete = match text.rfind('\n') {
        Some(end) => &text[..end],
        None => "",
    };
    complete
        .lines()
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Malformed record {}", i + 1))
        })
        .collect()
}

/// The most recent snapshot, if any was written after the header.
pub fn latest_checkpoint(path: &Path) -> Result<Option<Value>> {
    let mut records = read_records(path)?;
    if records.len() < 2 {
        return Ok(None);
    }
    Ok(records.pop())
}
