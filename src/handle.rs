//! Handle: a closable facade over one counted engine resource.
//!
//! Two independent primitives guard the resource:
//! - a read/write lock around the `closed` flag decides admission. Every
//!   operation clones the resource reference under the read lock; `close`
//!   takes the write lock, puts the handle's own reference and flips the flag.
//! - the reference count decides release. The engine's `close` runs when the
//!   last admitted operation puts its clone, which may be after
//!   [`Handle::close`] has returned.
//!
//! Close therefore never waits for in-flight operations, and no operation can
//! start once close has taken effect.

use crate::engine::{Engine, EngineResult, Item, Limits};
use crate::error::{Error, Result};
use crate::file_info::FileInfo;
use crate::leak::LeakCheck;
use crate::options::Options;
use crate::rc_handle::RcHandle;
use crate::session::{Reader, Writer};
use crate::signal::ReleasedSignal;
use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Slot<R> {
    cell: RcHandle<R>,
    closed: bool,
}

/// An admitted reference, put on every exit path including unwinding.
struct Admitted<R>(RcHandle<R>);

impl<R> Drop for Admitted<R> {
    fn drop(&mut self) {
        self.0.put();
    }
}

/// A guarded engine resource shared by concurrent callers.
pub struct Handle<E: Engine> {
    engine: Arc<E>,
    slot: RwLock<Slot<E::Resource>>,
    released: Arc<ReleasedSignal>,
    location: PathBuf,
    leak_check: LeakCheck,
}

impl<E: Engine + Default> Handle<E> {
    /// Open `location` with a fresh default engine and default options.
    pub fn open(location: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(Arc::new(E::default()), location, Options::default())
    }
}

impl<E: Engine> Handle<E> {
    /// Open `location` through `engine`. On failure no state is kept.
    pub fn open_with(
        engine: Arc<E>,
        location: impl AsRef<Path>,
        options: Options,
    ) -> Result<Self> {
        let location = location.as_ref().to_owned();
        let resource = engine.open(&location).map_err(|source| Error::Open {
            location: location.clone(),
            source,
        })?;
        log::debug!("opened {location:?}");
        let release = {
            let engine = Arc::clone(&engine);
            let location = location.clone();
            move |resource: E::Resource| {
                engine.close(resource);
                log::debug!("released {location:?}");
            }
        };
        let cell = RcHandle::with_leak_check(resource, release, options.leak_check);
        let handle = Self {
            engine,
            released: cell.released(),
            slot: RwLock::new(Slot {
                cell,
                closed: false,
            }),
            location,
            leak_check: options.leak_check,
        };
        if let Some(limits) = options.limits {
            if let Err(err) = handle.set_instance_limits(limits) {
                handle.close()?;
                return Err(err);
            }
        }
        Ok(handle)
    }

    /// Stop admitting operations and give up this handle's reference.
    ///
    /// Returns without waiting for operations already admitted; the engine
    /// resource is released when the last of them finishes. Closing again is
    /// a no-op.
    pub fn close(&self) -> Result<()> {
        let mut slot = self.slot.write();
        if slot.closed {
            return Ok(());
        }
        slot.cell.put();
        slot.closed = true;
        log::debug!(
            "closed {:?}, {} references in flight",
            self.location,
            slot.cell.ref_count()
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.slot.read().closed
    }

    /// Set once the engine resource has actually been released.
    pub fn released(&self) -> Arc<ReleasedSignal> {
        Arc::clone(&self.released)
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Take a reference for an operation, or fail if closed.
    fn acquire(&self) -> Result<RcHandle<E::Resource>> {
        let slot = self.slot.read();
        if slot.closed {
            log::debug!("rejected operation on closed handle {:?}", self.location);
            return Err(Error::HandleClosed);
        }
        // Cloned under the read lock so close cannot put the last reference
        // in between.
        Ok(slot.cell.clone())
    }

    /// Run `f` against the live resource. The resource cannot be released
    /// until `f` returns or unwinds.
    pub fn with_resource<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&E, &E::Resource) -> EngineResult<T>,
    {
        let admitted = Admitted(self.acquire()?);
        log::trace!("admitted operation on {:?}", self.location);
        f(&*self.engine, admitted.0.get()).map_err(Error::from)
    }

    /// Stat `key`, or `None` if it does not exist.
    pub fn stat(&self, key: impl AsRef<[u8]>) -> Result<Option<FileInfo>> {
        let key = key.as_ref();
        self.with_resource(|engine, r| {
            let stat = engine.single_stat(r, key)?;
            Ok(stat.map(|stat| FileInfo::new(key.to_vec(), stat)))
        })
    }

    /// Store `buf` under `key`, replacing any existing value.
    pub fn put_buf(&self, key: impl AsRef<[u8]>, buf: &[u8]) -> Result<u64> {
        self.with_resource(|engine, r| {
            let written = engine.write_single_buf(r, key.as_ref(), buf)?;
            debug_assert_eq!(written, buf.len() as u64, "short write without error");
            Ok(written)
        })
    }

    /// Read the whole value stored under `key`.
    pub fn get_buf(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        self.with_resource(|engine, r| engine.read_single_buf(r, key.as_ref()))
    }

    /// Read part of a value into `buf`. Returns 0 at or past the end.
    pub fn single_read_at(
        &self,
        key: impl AsRef<[u8]>,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.with_resource(|engine, r| engine.single_read_at(r, key.as_ref(), buf, offset))
    }

    pub fn list_items(&self, prefix: impl AsRef<[u8]>) -> Result<Vec<Item>> {
        self.with_resource(|engine, r| engine.list_items(r, prefix.as_ref()))
    }

    pub fn list_keys(&self, prefix: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        self.with_resource(|engine, r| {
            let items = engine.list_items(r, prefix.as_ref())?;
            Ok(items.into_iter().map(|item| item.key).collect())
        })
    }

    /// Delete `key`, returning what was deleted if it existed.
    pub fn single_delete(&self, key: impl AsRef<[u8]>) -> Result<Option<FileInfo>> {
        let key = key.as_ref();
        self.with_resource(|engine, r| {
            let stat = engine.single_delete(r, key)?;
            Ok(stat.map(|stat| FileInfo::new(key.to_vec(), stat)))
        })
    }

    pub fn rename_item(&self, from: impl AsRef<[u8]>, to: impl AsRef<[u8]>) -> Result<FileInfo> {
        let to = to.as_ref();
        self.with_resource(|engine, r| {
            let stat = engine.rename_item(r, from.as_ref(), to)?;
            Ok(FileInfo::new(to.to_vec(), stat))
        })
    }

    pub fn move_prefix(&self, from: impl AsRef<[u8]>, to: impl AsRef<[u8]>) -> Result<()> {
        self.with_resource(|engine, r| engine.move_prefix(r, from.as_ref(), to.as_ref()))
    }

    pub fn delete_prefix(&self, prefix: impl AsRef<[u8]>) -> Result<()> {
        self.with_resource(|engine, r| engine.delete_prefix(r, prefix.as_ref()))
    }

    pub fn set_instance_limits(&self, limits: Limits) -> Result<()> {
        self.with_resource(|engine, r| engine.set_instance_limits(r, &limits))
    }

    pub fn cleanup_snapshots(&self) -> Result<()> {
        self.with_resource(|engine, r| engine.cleanup_snapshots(r))
    }

    /// Start a read session. It holds its own reference, so the resource
    /// stays alive until the reader ends even if the handle is closed.
    pub fn new_reader(&self) -> Result<Reader<E>> {
        let cell = self.acquire()?;
        Ok(Reader::new(Arc::clone(&self.engine), cell))
    }

    /// Start a write session. Like readers, it holds its own reference.
    pub fn new_writer(&self) -> Result<Writer<E>> {
        let cell = self.acquire()?;
        Ok(Writer::new(Arc::clone(&self.engine), cell))
    }
}

impl<E: Engine> Drop for Handle<E> {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if slot.closed {
            return;
        }
        slot.cell.put();
        slot.closed = true;
        self.leak_check
            .report(&format!("handle for {:?}", self.location));
    }
}

impl<E: Engine> fmt::Debug for Handle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.read();
        f.debug_struct("Handle")
            .field("location", &self.location)
            .field("closed", &slot.closed)
            .field("cell", &slot.cell)
            .finish()
    }
}
