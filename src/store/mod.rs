//! Persisted entity store.
//!
//! Records are JSON documents addressed by a [`Key`]: a path of `(kind, name)`
//! pairs, where every prefix is the key of an ancestor. For example a component
//! result lives under its test run:
//!
//! ```text
//! TestRun:3f2a/ComponentTestResult:org-date-time
//! ```
//!
//! The store offers four primitives:
//! - point reads and upserts
//! - transactions scoped to one entity and its descendants (read-modify-write,
//!   all-or-nothing)
//! - paginated queries by kind, ancestor and field filters, continued with an
//!   opaque cursor
//!
//! Typed access to the records used by this crate lives in [`records`].

pub mod file;
pub mod memory;
pub mod records;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::persistence::LogError;
use crate::types::TransitionError;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Default number of records per query page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error in a file-backed store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The requested record does not exist.
    #[error("record not found: {0}")]
    NotFound(Key),

    /// A transaction touched a key outside its root.
    #[error("key {key} is outside the transaction root {root}")]
    OutOfScope { root: Key, key: Key },

    /// A record update would regress its lifecycle status.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// A query cursor could not be decoded.
    #[error("invalid cursor")]
    InvalidCursor,

    /// The store's lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// The on-disk snapshot has an incompatible layout.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    /// A log entry is out of sequence with the snapshot or its predecessor.
    #[error("log sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },

    /// A blocking disk write panicked or was cancelled.
    #[error("background write failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

impl From<LogError> for StoreError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Io(e) => StoreError::Io(e),
            LogError::Json(e) => StoreError::Json(e),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Address of a record: a non-empty path of `(kind, name)` segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    path: Vec<(String, String)>,
}

impl Key {
    /// Key of a root entity.
    pub fn root(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Key {
            path: vec![(kind.into(), name.into())],
        }
    }

    /// Key of a child entity under `self`.
    pub fn child(&self, kind: impl Into<String>, name: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push((kind.into(), name.into()));
        Key { path }
    }

    /// The record kind (last segment).
    pub fn kind(&self) -> &str {
        self.path.last().map(|(k, _)| k.as_str()).unwrap_or("")
    }

    /// The record name (last segment).
    pub fn name(&self) -> &str {
        self.path.last().map(|(_, n)| n.as_str()).unwrap_or("")
    }

    /// The parent key, if this is not a root.
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() <= 1 {
            return None;
        }
        Some(Key {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// Returns true if `ancestor` is a strict prefix of this key.
    pub fn is_descendant_of(&self, ancestor: &Key) -> bool {
        self.path.len() > ancestor.path.len() && self.path.starts_with(&ancestor.path)
    }

    /// Returns true if this key is `root` or one of its descendants.
    pub fn is_within(&self, root: &Key) -> bool {
        self == root || self.is_descendant_of(root)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (kind, name)) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}:{}", kind, name)?;
        }
        Ok(())
    }
}

/// A field predicate applied to query results.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `doc[field] == value`
    Eq { field: String, value: Value },
    /// `doc[field]` is an array containing `value`.
    Contains { field: String, value: Value },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::Eq { field, value } => doc.get(field) == Some(value),
            Filter::Contains { field, value } => doc
                .get(field)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
        }
    }
}

/// Opaque continuation token for a paginated query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    fn after(key: &Key) -> Result<Self> {
        Ok(Cursor(hex::encode(serde_json::to_vec(key)?)))
    }

    fn decode(&self) -> Result<Key> {
        let bytes = hex::decode(&self.0).map_err(|_| StoreError::InvalidCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| StoreError::InvalidCursor)
    }

    /// Returns the token as a string (for handing to API clients).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuilds a cursor from a token previously returned by [`Cursor::as_str`].
    pub fn from_token(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }
}

/// A query over records of one kind.
#[derive(Debug, Clone)]
pub struct Query {
    pub kind: String,
    /// Restrict to descendants of this key.
    pub ancestor: Option<Key>,
    pub filters: Vec<Filter>,
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

impl Query {
    pub fn kind(kind: impl Into<String>) -> Self {
        Query {
            kind: kind.into(),
            ancestor: None,
            filters: Vec::new(),
            limit: DEFAULT_PAGE_SIZE,
            cursor: None,
        }
    }

    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One page of query results, in key order.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<(Key, Value)>,
    /// Present when more results may follow.
    pub next_cursor: Option<Cursor>,
}

/// Staged reads and writes of a transaction scoped to `root` and its descendants.
///
/// Writes become visible to other store users only when the transaction
/// closure returns `Ok`.
pub struct Transaction<'a> {
    root: Key,
    base: &'a BTreeMap<Key, Value>,
    writes: Writes,
}

/// Staged writes of a transaction; `None` deletes the key.
pub(crate) type Writes = BTreeMap<Key, Option<Value>>;

impl<'a> Transaction<'a> {
    fn new(root: Key, base: &'a BTreeMap<Key, Value>) -> Self {
        Transaction {
            root,
            base,
            writes: BTreeMap::new(),
        }
    }

    fn check_scope(&self, key: &Key) -> Result<()> {
        if key.is_within(&self.root) {
            Ok(())
        } else {
            Err(StoreError::OutOfScope {
                root: self.root.clone(),
                key: key.clone(),
            })
        }
    }

    /// Reads a record, observing this transaction's own staged writes.
    pub fn get(&self, key: &Key) -> Result<Option<Value>> {
        self.check_scope(key)?;
        if let Some(staged) = self.writes.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.base.get(key).cloned())
    }

    pub fn put(&mut self, key: Key, value: Value) -> Result<()> {
        self.check_scope(&key)?;
        self.writes.insert(key, Some(value));
        Ok(())
    }

    pub fn delete(&mut self, key: &Key) -> Result<()> {
        self.check_scope(key)?;
        self.writes.insert(key.clone(), None);
        Ok(())
    }

    /// Keys of all live descendants of `ancestor`.
    pub fn descendants(&self, ancestor: &Key) -> Result<Vec<Key>> {
        self.check_scope(ancestor)?;
        let mut keys: Vec<Key> = self
            .base
            .keys()
            .filter(|k| k.is_descendant_of(ancestor))
            .filter(|k| !matches!(self.writes.get(*k), Some(None)))
            .cloned()
            .collect();
        for (k, v) in &self.writes {
            if v.is_some() && k.is_descendant_of(ancestor) && !self.base.contains_key(k) {
                keys.push(k.clone());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Deletes every descendant of `ancestor` (not `ancestor` itself).
    pub fn delete_descendants(&mut self, ancestor: &Key) -> Result<usize> {
        let keys = self.descendants(ancestor)?;
        for key in &keys {
            self.writes.insert(key.clone(), None);
        }
        Ok(keys.len())
    }

    fn into_writes(self) -> Writes {
        self.writes
    }
}

/// A kind-and-ancestor keyed document store.
pub trait EntityStore: Send + Sync + 'static {
    /// Reads one record.
    fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Inserts or replaces one record.
    fn upsert(&self, key: &Key, value: Value) -> impl Future<Output = Result<()>> + Send;

    /// Deletes one record. Returns whether it existed. Descendants are kept.
    fn delete(&self, key: &Key) -> impl Future<Output = Result<bool>> + Send;

    /// Runs `f` as an all-or-nothing transaction over `root` and its descendants.
    ///
    /// If `f` returns an error, no staged write is applied and the error is
    /// returned to the caller.
    fn transaction<T, F>(&self, root: &Key, f: F) -> impl Future<Output = Result<T>> + Send
    where
        T: Send,
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send;

    /// Returns one page of records matching `query`.
    fn query(&self, query: &Query) -> impl Future<Output = Result<Page>> + Send;
}

/// Shared in-memory entity table used by both store implementations.
#[derive(Debug, Default, Clone)]
pub(crate) struct Entities {
    pub(crate) records: BTreeMap<Key, Value>,
}

impl Entities {
    pub(crate) fn run_transaction<T, F>(&mut self, root: &Key, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let (out, writes) = self.stage_transaction(root, f)?;
        self.apply(writes);
        Ok(out)
    }

    /// Runs `f` against the current records and returns its staged writes
    /// without applying them. `None` marks a deletion.
    pub(crate) fn stage_transaction<T, F>(&self, root: &Key, f: F) -> Result<(T, Writes)>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut tx = Transaction::new(root.clone(), &self.records);
        let out = f(&mut tx)?;
        Ok((out, tx.into_writes()))
    }

    pub(crate) fn apply(&mut self, writes: Writes) {
        for (key, value) in writes {
            match value {
                Some(v) => {
                    self.records.insert(key, v);
                }
                None => {
                    self.records.remove(&key);
                }
            }
        }
    }

    pub(crate) fn query(&self, query: &Query) -> Result<Page> {
        let after = query.cursor.as_ref().map(Cursor::decode).transpose()?;
        let limit = query.limit.max(1);

        let mut items = Vec::new();
        let mut more = false;
        for (key, doc) in &self.records {
            if key.kind() != query.kind {
                continue;
            }
            if let Some(ref ancestor) = query.ancestor
                && !key.is_descendant_of(ancestor)
            {
                continue;
            }
            if let Some(ref after) = after
                && key <= after
            {
                continue;
            }
            if !query.filters.iter().all(|f| f.matches(doc)) {
                continue;
            }
            if items.len() == limit {
                more = true;
                break;
            }
            items.push((key.clone(), doc.clone()));
        }

        let next_cursor = match (more, items.last()) {
            (true, Some((last, _))) => Some(Cursor::after(last)?),
            _ => None,
        };
        Ok(Page { items, next_cursor })
    }
}
