//! Reader and writer sessions.
//!
//! A session is admitted once, when it is created, and keeps that reference
//! until it ends. Closing the [`Handle`](crate::Handle) stops new sessions
//! but lets existing ones finish against the live resource.
//!
//! A session is one long-lived admission rather than one per call, so its
//! methods use the resource through their own reference instead of going
//! through [`Handle::with_resource`](crate::Handle::with_resource).

use crate::engine::{Engine, EngineError, Item, SnapshotValue, Stat};
use crate::error::Result;
use crate::file_info::FileInfo;
use crate::rc_handle::RcHandle;
use std::io;
use std::sync::Arc;

/// Put the session's reference unless already done.
fn end_ref<R>(cell: &mut RcHandle<R>) {
    if !cell.is_put() {
        cell.put();
    }
}

/// A read session over a consistent snapshot of selected keys.
pub struct Reader<E: Engine> {
    engine: Arc<E>,
    cell: RcHandle<E::Resource>,
    keys: Vec<Vec<u8>>,
}

impl<E: Engine> Reader<E> {
    pub(crate) fn new(engine: Arc<E>, cell: RcHandle<E::Resource>) -> Self {
        Self {
            engine,
            cell,
            keys: Vec::new(),
        }
    }

    /// Queue `key` for the snapshot. Fails with `NoSuchKey` if it does not
    /// exist now. Returns the key's index in the [`Snapshot`].
    pub fn add(&mut self, key: impl AsRef<[u8]>) -> Result<usize> {
        let key = key.as_ref();
        if self.engine.single_stat(self.cell.get(), key)?.is_none() {
            return Err(EngineError::NoSuchKey.into());
        }
        self.keys.push(key.to_vec());
        Ok(self.keys.len() - 1)
    }

    /// Capture every queued key. A key deleted since `add` has no value.
    pub fn begin(&mut self) -> Result<Snapshot> {
        let captured = self.engine.read_snapshot(self.cell.get(), &self.keys)?;
        let values = self
            .keys
            .iter()
            .zip(captured)
            .map(|(key, value)| value.map(|value| Value::new(key.clone(), value)))
            .collect();
        Ok(Snapshot { values })
    }

    pub fn list_items(&self, prefix: impl AsRef<[u8]>) -> Result<Vec<Item>> {
        Ok(self.engine.list_items(self.cell.get(), prefix.as_ref())?)
    }

    /// End the session and give up its reference.
    pub fn end(mut self) {
        end_ref(&mut self.cell);
    }
}

impl<E: Engine> Drop for Reader<E> {
    fn drop(&mut self) {
        end_ref(&mut self.cell);
    }
}

/// Values captured by [`Reader::begin`], indexed by the order of `add`.
#[derive(Clone, Debug)]
pub struct Snapshot {
    values: Vec<Option<Value>>,
}

impl Snapshot {
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)?.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An immutable captured value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Value {
    key: Vec<u8>,
    stat: Stat,
    bytes: Arc<[u8]>,
}

impl Value {
    fn new(key: Vec<u8>, value: SnapshotValue) -> Self {
        Self {
            key,
            stat: value.stat,
            bytes: value.bytes.into(),
        }
    }

    pub fn stat(&self) -> FileInfo {
        FileInfo::new(self.key.clone(), self.stat)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy from `offset` into `buf`. Returns 0 at or past the end.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> usize {
        let Ok(offset) = usize::try_from(offset) else {
            return 0;
        };
        let Some(tail) = self.bytes.get(offset..) else {
            return 0;
        };
        let n = tail.len().min(buf.len());
        buf[..n].copy_from_slice(&tail[..n]);
        n
    }
}

/// A batch of writes applied together on [`commit`](Writer::commit).
///
/// Dropping a writer without committing discards everything staged.
pub struct Writer<E: Engine> {
    engine: Arc<E>,
    cell: RcHandle<E::Resource>,
    staged: Vec<(Vec<u8>, Vec<u8>)>,
}

impl<E: Engine> Writer<E> {
    pub(crate) fn new(engine: Arc<E>, cell: RcHandle<E::Resource>) -> Self {
        Self {
            engine,
            cell,
            staged: Vec::new(),
        }
    }

    pub fn start_new_value(&self) -> ValueWriter {
        ValueWriter::default()
    }

    pub fn stage(&mut self, key: impl AsRef<[u8]>, value: ValueWriter) {
        self.staged.push((key.as_ref().to_vec(), value.buf));
    }

    pub fn stage_buf(&mut self, key: impl AsRef<[u8]>, buf: &[u8]) {
        self.staged.push((key.as_ref().to_vec(), buf.to_vec()));
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Apply everything staged, then end the session.
    pub fn commit(mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let res = self.engine.commit_batch(self.cell.get(), staged);
        end_ref(&mut self.cell);
        Ok(res?)
    }
}

impl<E: Engine> Drop for Writer<E> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            log::debug!("discarding {} uncommitted writes", self.staged.len());
        }
        end_ref(&mut self.cell);
    }
}

/// Buffers one value's bytes until it is staged.
#[derive(Debug, Default)]
pub struct ValueWriter {
    buf: Vec<u8>,
}

impl ValueWriter {
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl io::Write for ValueWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
