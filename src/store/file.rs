//! File-backed entity store.
//!
//! The record table lives in memory. Each committed write (an upsert, a delete
//! or a whole transaction) is appended as one line to an event log and synced
//! before it becomes visible. Every [`DEFAULT_COMPACT_AFTER`] entries the table
//! is written to a fresh snapshot and the log starts over.
//!
//! # Layout
//!
//! ```text
//! <dir>/snapshot.json       { "schema_version": 1, "generation": N, "next_seq": S, "records": [...] }
//! <dir>/events.<N>.log      { "seq": S, "ts": "...", "writes": [[<key>, <doc or null>], ...] }
//! ```
//!
//! # Compaction
//!
//! 1. Create the empty log for generation N+1
//! 2. Atomically replace the snapshot with one naming generation N+1
//! 3. Delete the generation N log
//!
//! The snapshot rename is the commit point. A crash before it leaves the old
//! snapshot and log intact; a crash after it leaves a snapshot whose log is
//! empty or missing. Logs of other generations are removed on open.
//!
//! Disk writes run on the blocking pool. Writers are serialized by an async
//! mutex; readers only take the in-memory lock and never wait on the disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Entities, EntityStore, Key, Page, Query, Result, StoreError, Transaction, Writes};
use crate::persistence::{EntryLog, fsync_dir, write_atomic};

/// Current snapshot schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Log entries written before the table is compacted into a new snapshot.
pub const DEFAULT_COMPACT_AFTER: usize = 1000;

const SNAPSHOT_FILE: &str = "snapshot.json";

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    generation: u64,
    /// Sequence number of the first entry in this generation's log.
    next_seq: u64,
    records: Vec<(Key, Value)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogEntry {
    seq: u64,
    ts: DateTime<Utc>,
    writes: Vec<(Key, Option<Value>)>,
}

fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join(SNAPSHOT_FILE)
}

fn log_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("events.{generation}.log"))
}

/// Generation of a log file name, if it is one.
fn log_generation(name: &str) -> Option<u64> {
    name.strip_prefix("events.")?.strip_suffix(".log")?.parse().ok()
}

#[derive(Debug)]
struct Writer {
    log: Arc<EntryLog>,
    generation: u64,
    next_seq: u64,
    since_compaction: usize,
}

/// A durable [`EntityStore`] persisted to a snapshot plus an event log.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    entities: RwLock<Entities>,
    writer: tokio::sync::Mutex<Writer>,
    compact_after: usize,
}

impl FileStore {
    /// Opens the store in `dir`, creating the directory if needed and
    /// replaying the log written since the last snapshot.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let snapshot = match std::fs::read(snapshot_path(&dir)) {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                if snapshot.schema_version != SCHEMA_VERSION {
                    return Err(StoreError::SchemaMismatch {
                        expected: SCHEMA_VERSION,
                        got: snapshot.schema_version,
                    });
                }
                snapshot
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "No store snapshot, starting empty");
                Snapshot {
                    schema_version: SCHEMA_VERSION,
                    saved_at: Utc::now(),
                    generation: 0,
                    next_seq: 0,
                    records: Vec::new(),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let generation = snapshot.generation;
        let mut next_seq = snapshot.next_seq;
        let mut entities = Entities {
            records: snapshot.records.into_iter().collect(),
        };

        let path = log_path(&dir, generation);
        let entries: Vec<LogEntry> = EntryLog::replay(&path)?;
        for entry in &entries {
            if entry.seq != next_seq {
                return Err(StoreError::SequenceMismatch {
                    expected: next_seq,
                    got: entry.seq,
                });
            }
            next_seq += 1;
        }
        let replayed = entries.len();
        for entry in entries {
            entities.apply(entry.writes.into_iter().collect());
        }

        remove_stale_logs(&dir, generation)?;
        let log = EntryLog::open(&path)?;

        info!(
            dir = %dir.display(),
            generation,
            records = entities.records.len(),
            replayed,
            "Opened store"
        );

        Ok(FileStore {
            dir,
            entities: RwLock::new(entities),
            writer: tokio::sync::Mutex::new(Writer {
                log: Arc::new(log),
                generation,
                next_seq,
                since_compaction: replayed,
            }),
            compact_after: DEFAULT_COMPACT_AFTER,
        })
    }

    /// Sets how many log entries trigger a compaction.
    pub fn with_compaction_threshold(mut self, entries: usize) -> Self {
        self.compact_after = entries.max(1);
        self
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Entities>> {
        self.entities.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Entities>> {
        self.entities.write().map_err(|_| StoreError::Poisoned)
    }

    /// Logs `writes` durably, then applies them to the table.
    ///
    /// A failed append leaves the table unchanged. Compaction failures are
    /// logged and retried after the next write.
    async fn commit(&self, writer: &mut Writer, writes: Writes) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let entry = LogEntry {
            seq: writer.next_seq,
            ts: Utc::now(),
            writes: writes.into_iter().collect(),
        };
        let log = writer.log.clone();
        let entry = tokio::task::spawn_blocking(move || log.append(&entry).map(|()| entry)).await??;

        writer.next_seq += 1;
        writer.since_compaction += 1;
        self.write()?.apply(entry.writes.into_iter().collect());

        if writer.since_compaction >= self.compact_after
            && let Err(e) = self.compact(writer).await
        {
            warn!(dir = %self.dir.display(), error = %e, "Store compaction failed");
        }
        Ok(())
    }

    async fn compact(&self, writer: &mut Writer) -> Result<()> {
        let old = writer.generation;
        let generation = old + 1;
        let records: Vec<(Key, Value)> = self
            .read()?
            .records
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let snapshot = Snapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            generation,
            next_seq: writer.next_seq,
            records,
        };

        let dir = self.dir.clone();
        let log = tokio::task::spawn_blocking(move || -> Result<EntryLog> {
            let log = EntryLog::open(log_path(&dir, generation))?;
            fsync_dir(&dir)?;
            let bytes = serde_json::to_vec(&snapshot)?;
            write_atomic(&snapshot_path(&dir), &bytes)?;
            if let Err(e) = std::fs::remove_file(log_path(&dir, old))
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(dir = %dir.display(), generation = old, error = %e, "Failed to remove old log");
            }
            Ok(log)
        })
        .await??;

        debug!(dir = %self.dir.display(), generation, "Compacted store");
        writer.log = Arc::new(log);
        writer.generation = generation;
        writer.since_compaction = 0;
        Ok(())
    }
}

/// Deletes logs that belong to a generation other than `current`.
fn remove_stale_logs(dir: &Path, current: u64) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(generation) = name.to_str().and_then(log_generation) else {
            continue;
        };
        if generation != current {
            debug!(file = ?name, "Removing stale store log");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

impl EntityStore for FileStore {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.read()?.records.get(key).cloned())
    }

    async fn upsert(&self, key: &Key, value: Value) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writes = Writes::from([(key.clone(), Some(value))]);
        self.commit(&mut writer, writes).await
    }

    async fn delete(&self, key: &Key) -> Result<bool> {
        let mut writer = self.writer.lock().await;
        let existed = self.read()?.records.contains_key(key);
        if existed {
            self.commit(&mut writer, Writes::from([(key.clone(), None)]))
                .await?;
        }
        Ok(existed)
    }

    async fn transaction<T, F>(&self, root: &Key, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send,
    {
        let mut writer = self.writer.lock().await;
        let (out, writes) = {
            let entities = self.read()?;
            entities.stage_transaction(root, f)?
        };
        self.commit(&mut writer, writes).await?;
        Ok(out)
    }

    async fn query(&self, query: &Query) -> Result<Page> {
        self.read()?.query(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    fn log_lines(dir: &Path, generation: u64) -> usize {
        std::fs::read_to_string(log_path(dir, generation))
            .unwrap()
            .lines()
            .count()
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let key = Key::root("BuildJob", "b1").child("Note", "n");

        {
            let store = FileStore::open(dir.path()).unwrap();
            store.upsert(&key, json!({"x": 1})).await.unwrap();
        }

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&key).await.unwrap(), Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn writes_append_without_rewriting_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        for n in 0..5 {
            let key = Key::root("TestRun", format!("r{n}"));
            store.upsert(&key, json!({"n": n})).await.unwrap();
        }
        store
            .transaction(&Key::root("TestRun", "r0"), |tx| {
                tx.put(Key::root("TestRun", "r0"), json!({"n": 10}))
            })
            .await
            .unwrap();

        // One line per committed write; the snapshot is untouched.
        assert_eq!(log_lines(dir.path(), 0), 6);
        assert!(!snapshot_path(dir.path()).exists());
    }

    #[tokio::test]
    async fn failed_transaction_is_not_persisted() {
        let dir = tempdir().unwrap();
        let root = Key::root("TestRun", "r1");

        let store = FileStore::open(dir.path()).unwrap();
        store.upsert(&root, json!({"n": 1})).await.unwrap();
        let result: Result<()> = store
            .transaction(&root, |tx| {
                tx.put(root.clone(), json!({"n": 2}))?;
                Err(StoreError::NotFound(root.clone()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(&root).await.unwrap(), Some(json!({"n": 1})));
        assert_eq!(log_lines(dir.path(), 0), 1);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&root).await.unwrap(), Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn deleting_missing_key_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let key = Key::root("BuildJob", "b1");

        assert!(!store.delete(&key).await.unwrap());
        assert_eq!(log_lines(dir.path(), 0), 0);

        store.upsert(&key, json!({})).await.unwrap();
        assert!(store.delete(&key).await.unwrap());

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn compaction_folds_log_into_snapshot() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path())
            .unwrap()
            .with_compaction_threshold(3);

        for n in 0..4 {
            let key = Key::root("TestRun", format!("r{n}"));
            store.upsert(&key, json!({"n": n})).await.unwrap();
        }

        assert!(snapshot_path(dir.path()).exists());
        assert!(!log_path(dir.path(), 0).exists());
        assert_eq!(log_lines(dir.path(), 1), 1);

        let reopened = FileStore::open(dir.path()).unwrap();
        for n in 0..4 {
            let key = Key::root("TestRun", format!("r{n}"));
            assert_eq!(reopened.get(&key).await.unwrap(), Some(json!({"n": n})));
        }
    }

    #[tokio::test]
    async fn torn_log_tail_is_dropped_on_open() {
        let dir = tempdir().unwrap();
        let key = Key::root("BuildJob", "b1");
        {
            let store = FileStore::open(dir.path()).unwrap();
            store.upsert(&key, json!({"x": 1})).await.unwrap();
        }
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(log_path(dir.path(), 0))
            .unwrap();
        file.write_all(br#"{"seq": 1, "ts": "2024-"#).unwrap();
        drop(file);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get(&key).await.unwrap(), Some(json!({"x": 1})));

        let other = Key::root("BuildJob", "b2");
        reopened.upsert(&other, json!({"x": 2})).await.unwrap();
        let again = FileStore::open(dir.path()).unwrap();
        assert_eq!(again.get(&other).await.unwrap(), Some(json!({"x": 2})));
    }

    #[test]
    fn open_removes_logs_of_other_generations() {
        let dir = tempdir().unwrap();
        std::fs::write(log_path(dir.path(), 7), "").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "").unwrap();

        FileStore::open(dir.path()).unwrap();

        assert!(!log_path(dir.path(), 7).exists());
        assert!(log_path(dir.path(), 0).exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn open_rejects_unknown_schema() {
        let dir = tempdir().unwrap();
        std::fs::write(
            snapshot_path(dir.path()),
            r#"{"schema_version": 99, "saved_at": "2024-01-01T00:00:00Z", "generation": 0, "next_seq": 0, "records": []}"#,
        )
        .unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(
            result,
            Err(StoreError::SchemaMismatch { expected: 1, got: 99 })
        ));
    }

    #[test]
    fn open_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path().join("absent")).unwrap();
        assert!(store.read().unwrap().records.is_empty());
    }

    #[test]
    fn log_file_names() {
        assert_eq!(log_generation("events.12.log"), Some(12));
        assert_eq!(log_generation("events.x.log"), None);
        assert_eq!(log_generation("snapshot.json"), None);
    }
}
