//! The capability set a storage engine exposes to a [`Handle`].
//!
//! The engine owns the meaning of every operation. A `Handle` only decides
//! whether an operation may start and when `close` is finally called.
//!
//! [`Handle`]: crate::Handle

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Errors reported by an engine. Passed through [`Handle`](crate::Handle)
/// unchanged.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no such key")]
    NoSuchKey,
    /// The resource is not (or no longer) an open instance. Seeing this from
    /// a `Handle` means a resource was used after release.
    #[error("invalid engine handle")]
    InvalidHandle,
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("key already exists")]
    AlreadyExists,
    /// Another open instance already owns this location.
    #[error("{0:?} is already open")]
    InUse(PathBuf),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Size and recency of one stored value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stat {
    pub size: u64,
    pub last_used: SystemTime,
}

/// A key and its stat, as returned by prefix listings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Item {
    pub key: Vec<u8>,
    pub stat: Stat,
}

/// Per-instance limits.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Limits {
    /// Evict least recently used values while the total value length
    /// exceeds this.
    pub max_value_length_sum: Option<u64>,
    /// Keep freed space allocated instead of punching holes. Only engines
    /// that pack values into shared files act on this; [`DirEngine`] stores
    /// one file per value and ignores it.
    ///
    /// [`DirEngine`]: crate::DirEngine
    pub disable_hole_punching: bool,
}

/// A value captured by a reader snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotValue {
    pub stat: Stat,
    pub bytes: Vec<u8>,
}

/// Native resource capabilities.
///
/// Operations on one resource may run concurrently with each other; the
/// engine is responsible for its own internal consistency. `close` is called
/// exactly once per resource returned by `open`, and never while another
/// operation on that resource is running.
pub trait Engine: Send + Sync + 'static {
    /// The opaque native handle for one open instance.
    type Resource: Send + Sync + 'static;

    fn open(&self, location: &Path) -> EngineResult<Self::Resource>;

    fn close(&self, resource: Self::Resource);

    fn single_stat(&self, resource: &Self::Resource, key: &[u8]) -> EngineResult<Option<Stat>>;

    /// Store `buf` under `key`, replacing any existing value. Returns the
    /// number of bytes written.
    fn write_single_buf(
        &self,
        resource: &Self::Resource,
        key: &[u8],
        buf: &[u8],
    ) -> EngineResult<u64>;

    fn read_single_buf(&self, resource: &Self::Resource, key: &[u8]) -> EngineResult<Vec<u8>>;

    /// Read into `buf` starting at `offset`. Returns 0 at or past the end of
    /// the value.
    fn single_read_at(
        &self,
        resource: &Self::Resource,
        key: &[u8],
        buf: &mut [u8],
        offset: u64,
    ) -> EngineResult<usize>;

    fn list_items(&self, resource: &Self::Resource, prefix: &[u8]) -> EngineResult<Vec<Item>>;

    /// Delete `key`, returning its stat if it existed.
    fn single_delete(&self, resource: &Self::Resource, key: &[u8]) -> EngineResult<Option<Stat>>;

    fn rename_item(&self, resource: &Self::Resource, from: &[u8], to: &[u8])
        -> EngineResult<Stat>;

    /// Replace the prefix `from` with `to` on every matching key.
    fn move_prefix(&self, resource: &Self::Resource, from: &[u8], to: &[u8])
        -> EngineResult<()>;

    fn delete_prefix(&self, resource: &Self::Resource, prefix: &[u8]) -> EngineResult<()>;

    fn set_instance_limits(&self, resource: &Self::Resource, limits: &Limits)
        -> EngineResult<()>;

    /// Remove leftovers of interrupted writes.
    fn cleanup_snapshots(&self, resource: &Self::Resource) -> EngineResult<()>;

    /// Capture the current values of `keys`. Missing keys yield `None`.
    fn read_snapshot(
        &self,
        resource: &Self::Resource,
        keys: &[Vec<u8>],
    ) -> EngineResult<Vec<Option<SnapshotValue>>>;

    /// Apply a batch of writes.
    fn commit_batch(
        &self,
        resource: &Self::Resource,
        writes: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> EngineResult<()>;
}
