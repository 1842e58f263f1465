//! Append-only JSON Lines log.
//!
//! One JSON object per line. A crash mid-write leaves at most one partial
//! final line, which [`EntryLog::replay`] detects and truncates, so the file
//! always holds a valid prefix of the entries that were appended.
//!
//! Appends take `&self`: `&File` implements `Write`, so a log shared behind an
//! `Arc` can be written from a blocking task while its owner keeps a handle.
//! Callers serialize their own appends.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::atomic::fsync_file;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LogError>;

/// An append-only log file.
#[derive(Debug)]
pub struct EntryLog {
    file: File,
    path: PathBuf,
}

impl EntryLog {
    /// Opens `path` for append, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(EntryLog { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one entry as a line and syncs it to disk.
    pub fn append<T: Serialize>(&self, entry: &T) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        (&self.file).write_all(&line)?;
        fsync_file(&self.file)?;
        Ok(())
    }

    /// Reads every complete entry of the log at `path`.
    ///
    /// A missing file reads as empty. Reading stops at the first line that
    /// does not parse; the file is truncated there so later appends continue
    /// from a valid prefix.
    pub fn replay<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        let mut valid_len = 0u64;
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                // A line without its newline was cut short even if it parses.
                if !line.ends_with('\n') {
                    break;
                }
                match serde_json::from_str(trimmed) {
                    Ok(entry) => entries.push(entry),
                    Err(_) => break,
                }
            }
            valid_len += read as u64;
        }

        if valid_len < file_len {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            fsync_file(&file)?;
        }
        Ok(entries)
    }
}
