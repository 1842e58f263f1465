//! Crash-safe file replacement.
//!
//! Files are written with the write-to-temp-then-rename pattern:
//! 1. Write to `<path>.tmp`
//! 2. fsync the temp file
//! 3. Rename to `<path>`
//! 4. fsync the parent directory
//!
//! Readers always see either the old or the new contents, never a partial write.
//! Without the directory fsync the rename itself may not survive a power loss.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entries created or renamed in it are durable.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}

/// Path of the temp file used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("file"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically replaces the contents of `path` with `bytes`.
///
/// Creates parent directories as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Atomically replaces several files.
///
/// All temp files are written and synced before the first rename, so a failure
/// while writing leaves every target untouched. The renames themselves happen in
/// order; a crash between renames can leave a prefix of the files replaced.
pub fn write_all_atomic(files: &[(&Path, &[u8])]) -> io::Result<()> {
    let mut staged = Vec::with_capacity(files.len());
    for (path, bytes) in files {
        let tmp_path = temp_path(path);
        let result = (|| {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(bytes)?;
            fsync_file(&file)
        })();
        if let Err(e) = result {
            let _ = std::fs::remove_file(&tmp_path);
            for (tmp, _) in &staged {
                let _ = std::fs::remove_file(tmp);
            }
            return Err(e);
        }
        staged.push((tmp_path, *path));
    }

    for (tmp_path, path) in &staged {
        std::fs::rename(tmp_path, path)?;
    }

    for (_, path) in &staged {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fsync_dir(parent)?;
        }
    }

    Ok(())
}
