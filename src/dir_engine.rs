//! DirEngine: a small directory-backed engine.
//!
//! Open instances live in a [`SlotMap`]; the native resource handed to a
//! [`Handle`](crate::Handle) is the generational [`InstanceKey`]. Using a key
//! after `close` fails with [`EngineError::InvalidHandle`] instead of
//! touching freed state, which makes use-after-release observable in tests.
//!
//! On disk, each value is a file under `values/` named by the hex encoding
//! of its key. Writes are staged under `staging/` and renamed into place.
//! The manifest (key to stat) is rebuilt from `values/` on open and kept in
//! memory afterwards, so a directory belongs to one open instance at a time.
//! Opening a directory that is already open in this process fails with
//! [`EngineError::InUse`].
//!
//! Keys are at most [`DirEngine::MAX_KEY_LEN`] bytes so that their file
//! names fit common file system limits.

use crate::engine::{Engine, EngineError, EngineResult, Item, Limits, SnapshotValue, Stat};
use hashbrown::HashMap;
use parking_lot::Mutex;
use slotmap::SlotMap;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

const VALUES_DIR: &str = "values";
const STAGING_DIR: &str = "staging";

/// Directories owned by an open instance in this process.
static OPEN_DIRS: Mutex<Vec<PathBuf>> = parking_lot::const_mutex(Vec::new());

slotmap::new_key_type! {
    /// Native handle to one open [`DirEngine`] instance.
    pub struct InstanceKey;
}

#[derive(Debug, Default)]
pub struct DirEngine {
    instances: Mutex<SlotMap<InstanceKey, Arc<Instance>>>,
}

#[derive(Debug)]
struct Instance {
    dir: PathBuf,
    _claim: DirClaim,
    state: Mutex<State>,
    staging_seq: AtomicU64,
}

#[derive(Debug, Default)]
struct State {
    manifest: HashMap<Vec<u8>, Entry>,
    limits: Limits,
    // Logical clock for eviction order; wall-clock stamps can tie.
    clock: u64,
}

#[derive(Copy, Clone, Debug)]
struct Entry {
    stat: Stat,
    used: u64,
}

/// One key's part in a prefix move.
struct Move {
    from: Vec<u8>,
    to: Vec<u8>,
    staged: PathBuf,
    entry: Entry,
}

/// Exclusive claim on a directory, held for the life of its instance.
#[derive(Debug)]
struct DirClaim {
    dir: PathBuf,
}

impl DirClaim {
    fn acquire(dir: &Path) -> EngineResult<Self> {
        let dir = fs::canonicalize(dir).map_err(|e| EngineError::io(dir, e))?;
        let mut open = OPEN_DIRS.lock();
        if open.contains(&dir) {
            return Err(EngineError::InUse(dir));
        }
        open.push(dir.clone());
        Ok(Self { dir })
    }
}

impl Drop for DirClaim {
    fn drop(&mut self) {
        OPEN_DIRS.lock().retain(|d| d != &self.dir);
    }
}

impl DirEngine {
    /// Longest accepted key. Its hex file name is 254 bytes.
    pub const MAX_KEY_LEN: usize = 127;

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instances opened and not yet closed.
    pub fn open_instances(&self) -> usize {
        self.instances.lock().len()
    }

    /// Whether `key` still refers to an open instance.
    pub fn is_open(&self, key: InstanceKey) -> bool {
        self.instances.lock().contains_key(key)
    }

    fn instance(&self, key: &InstanceKey) -> EngineResult<Arc<Instance>> {
        self.instances
            .lock()
            .get(*key)
            .cloned()
            .ok_or(EngineError::InvalidHandle)
    }
}

fn encode_key(key: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut s = String::with_capacity(key.len() * 2);
    for b in key {
        s.push(HEX[(b >> 4) as usize] as char);
        s.push(HEX[(b & 0xf) as usize] as char);
    }
    s
}

/// Inverse of [`encode_key`]. Only names `encode_key` can produce decode.
fn decode_key(name: &str) -> Option<Vec<u8>> {
    let nibble = |c: char| match c {
        '0'..='9' | 'a'..='f' => c.to_digit(16).map(|d| d as u8),
        _ => None,
    };
    let nibbles: Vec<u8> = name.chars().map(nibble).collect::<Option<_>>()?;
    if nibbles.is_empty() || nibbles.len() % 2 != 0 {
        return None;
    }
    Some(nibbles.chunks(2).map(|p| (p[0] << 4) | p[1]).collect())
}

fn check_key(key: &[u8]) -> EngineResult<()> {
    if key.is_empty() {
        return Err(EngineError::InvalidKey("empty key".to_owned()));
    }
    if key.len() > DirEngine::MAX_KEY_LEN {
        return Err(EngineError::InvalidKey(format!(
            "key is {} bytes, at most {} allowed",
            key.len(),
            DirEngine::MAX_KEY_LEN
        )));
    }
    Ok(())
}

fn not_found_ok(res: io::Result<()>) -> io::Result<()> {
    match res {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Instance {
    fn open(dir: &Path) -> EngineResult<Self> {
        let values = dir.join(VALUES_DIR);
        let staging = dir.join(STAGING_DIR);
        for d in [&values, &staging] {
            fs::create_dir_all(d).map_err(|e| EngineError::io(d, e))?;
        }
        let claim = DirClaim::acquire(dir)?;
        let mut state = State::default();
        for dirent in fs::read_dir(&values).map_err(|e| EngineError::io(&values, e))? {
            let dirent = dirent.map_err(|e| EngineError::io(&values, e))?;
            let name = dirent.file_name();
            let Some(key) = name.to_str().and_then(decode_key) else {
                log::warn!("ignoring unexpected file {:?}", dirent.path());
                continue;
            };
            let meta = dirent
                .metadata()
                .map_err(|e| EngineError::io(dirent.path(), e))?;
            let stat = Stat {
                size: meta.len(),
                last_used: meta.modified().unwrap_or_else(|_| SystemTime::now()),
            };
            state.insert(key, stat);
        }
        log::debug!("loaded {} values from {:?}", state.manifest.len(), dir);
        Ok(Self {
            dir: dir.to_owned(),
            _claim: claim,
            state: Mutex::new(state),
            staging_seq: AtomicU64::new(0),
        })
    }

    fn value_path(&self, key: &[u8]) -> PathBuf {
        self.dir.join(VALUES_DIR).join(encode_key(key))
    }

    fn staging_path(&self) -> PathBuf {
        let seq = self.staging_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{seq}.tmp", std::process::id());
        self.dir.join(STAGING_DIR).join(name)
    }

    /// Write `buf` to a fresh staging file.
    fn stage(&self, buf: &[u8]) -> EngineResult<PathBuf> {
        let path = self.staging_path();
        if let Err(err) = fs::write(&path, buf) {
            self.discard(&path);
            return Err(EngineError::io(&path, err));
        }
        Ok(path)
    }

    fn discard(&self, staged: &Path) {
        if let Err(err) = not_found_ok(fs::remove_file(staged)) {
            log::warn!("leaving staging file {staged:?}: {err}");
        }
    }

    /// Move a staged file into place as `key`'s value. The staged file is
    /// removed if that fails.
    fn publish(&self, staged: &Path, key: &[u8]) -> EngineResult<()> {
        let res = self.rename(staged, &self.value_path(key));
        if res.is_err() {
            self.discard(staged);
        }
        res
    }

    fn rename(&self, from: &Path, to: &Path) -> EngineResult<()> {
        fs::rename(from, to).map_err(|e| EngineError::io(from, e))
    }

    /// Return staged values to their source keys.
    fn unstage(&self, moves: &[Move]) {
        for m in moves {
            if let Err(err) = self.rename(&m.staged, &self.value_path(&m.from)) {
                log::error!("failed to restore {:?}: {err}", encode_key(&m.from));
            }
        }
    }

    fn remove_value(&self, key: &[u8]) -> EngineResult<()> {
        let path = self.value_path(key);
        not_found_ok(fs::remove_file(&path)).map_err(|e| EngineError::io(&path, e))
    }

    /// Evict least recently used values until the instance is within its
    /// value length limit.
    fn apply_limits(&self, state: &mut State) -> EngineResult<()> {
        let Some(max) = state.limits.max_value_length_sum else {
            return Ok(());
        };
        let mut total: u64 = state.manifest.values().map(|e| e.stat.size).sum();
        while total > max {
            let Some(victim) = state
                .manifest
                .iter()
                .min_by_key(|(_, e)| e.used)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            self.remove_value(&victim)?;
            if let Some(entry) = state.manifest.remove(&victim) {
                log::info!("evicting {:?} ({} bytes)", encode_key(&victim), entry.stat.size);
                total -= entry.stat.size;
            }
        }
        Ok(())
    }

    fn read_file(&self, key: &[u8]) -> EngineResult<Vec<u8>> {
        let path = self.value_path(key);
        fs::read(&path).map_err(|e| EngineError::io(&path, e))
    }
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, key: Vec<u8>, stat: Stat) {
        let used = self.tick();
        self.manifest.insert(key, Entry { stat, used });
    }

    /// Look up `key` and mark it used.
    fn touch(&mut self, key: &[u8]) -> Option<Stat> {
        let used = self.tick();
        let entry = self.manifest.get_mut(key)?;
        entry.used = used;
        entry.stat.last_used = SystemTime::now();
        Some(entry.stat)
    }

    fn written(&mut self, key: Vec<u8>, size: u64) -> Stat {
        let stat = Stat {
            size,
            last_used: SystemTime::now(),
        };
        self.insert(key, stat);
        stat
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        let mut keys: Vec<_> = self
            .manifest
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl Engine for DirEngine {
    type Resource = InstanceKey;

    fn open(&self, location: &Path) -> EngineResult<InstanceKey> {
        let instance = Instance::open(location)?;
        let key = self.instances.lock().insert(Arc::new(instance));
        log::debug!("opened instance {key:?} at {location:?}");
        Ok(key)
    }

    fn close(&self, resource: InstanceKey) {
        match self.instances.lock().remove(resource) {
            Some(instance) => log::debug!("closed instance {resource:?} at {:?}", instance.dir),
            None => log::error!("close of unknown instance {resource:?}"),
        }
    }

    fn single_stat(&self, resource: &InstanceKey, key: &[u8]) -> EngineResult<Option<Stat>> {
        let instance = self.instance(resource)?;
        let state = instance.state.lock();
        Ok(state.manifest.get(key).map(|e| e.stat))
    }

    fn write_single_buf(&self, resource: &InstanceKey, key: &[u8], buf: &[u8]) -> EngineResult<u64> {
        check_key(key)?;
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        let staged = instance.stage(buf)?;
        instance.publish(&staged, key)?;
        state.written(key.to_vec(), buf.len() as u64);
        instance.apply_limits(&mut state)?;
        Ok(buf.len() as u64)
    }

    fn read_single_buf(&self, resource: &InstanceKey, key: &[u8]) -> EngineResult<Vec<u8>> {
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        state.touch(key).ok_or(EngineError::NoSuchKey)?;
        instance.read_file(key)
    }

    fn single_read_at(
        &self,
        resource: &InstanceKey,
        key: &[u8],
        buf: &mut [u8],
        offset: u64,
    ) -> EngineResult<usize> {
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        let stat = state.touch(key).ok_or(EngineError::NoSuchKey)?;
        if offset >= stat.size || buf.is_empty() {
            return Ok(0);
        }
        let path = instance.value_path(key);
        let io_err = |e: io::Error| EngineError::io(&path, e);
        let mut file = File::open(&path).map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        let mut n = 0;
        while n < buf.len() {
            match file.read(&mut buf[n..]) {
                Ok(0) => break,
                Ok(k) => n += k,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(io_err(err)),
            }
        }
        Ok(n)
    }

    fn list_items(&self, resource: &InstanceKey, prefix: &[u8]) -> EngineResult<Vec<Item>> {
        let instance = self.instance(resource)?;
        let state = instance.state.lock();
        Ok(state
            .keys_with_prefix(prefix)
            .into_iter()
            .map(|key| {
                let stat = state.manifest[&key].stat;
                Item { key, stat }
            })
            .collect())
    }

    fn single_delete(&self, resource: &InstanceKey, key: &[u8]) -> EngineResult<Option<Stat>> {
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        let Some(entry) = state.manifest.remove(key) else {
            return Ok(None);
        };
        instance.remove_value(key)?;
        Ok(Some(entry.stat))
    }

    fn rename_item(&self, resource: &InstanceKey, from: &[u8], to: &[u8]) -> EngineResult<Stat> {
        check_key(to)?;
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        let entry = *state.manifest.get(from).ok_or(EngineError::NoSuchKey)?;
        if from == to {
            return Ok(entry.stat);
        }
        instance.rename(&instance.value_path(from), &instance.value_path(to))?;
        state.manifest.remove(from);
        Ok(state.written(to.to_vec(), entry.stat.size))
    }

    fn move_prefix(&self, resource: &InstanceKey, from: &[u8], to: &[u8]) -> EngineResult<()> {
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        let mut moves = Vec::new();
        for key in state.keys_with_prefix(from) {
            let mut new_key = to.to_vec();
            new_key.extend_from_slice(&key[from.len()..]);
            check_key(&new_key)?;
            let entry = state.manifest[&key];
            moves.push(Move {
                from: key,
                to: new_key,
                staged: instance.staging_path(),
                entry,
            });
        }

        // Two passes through staging so a destination key can never clobber
        // a source key that has not moved yet. The manifest is only touched
        // once every file is in place; on failure all values go back to
        // their source keys.
        for (i, m) in moves.iter().enumerate() {
            if let Err(err) = instance.rename(&instance.value_path(&m.from), &m.staged) {
                instance.unstage(&moves[..i]);
                return Err(err);
            }
        }
        for (i, m) in moves.iter().enumerate() {
            if let Err(err) = instance.rename(&m.staged, &instance.value_path(&m.to)) {
                for done in &moves[..i] {
                    if let Err(err) = instance.rename(&instance.value_path(&done.to), &done.staged) {
                        log::error!("failed to unpublish {:?}: {err}", encode_key(&done.to));
                    }
                    // A key outside the move that was overwritten is gone.
                    if !moves.iter().any(|src| src.from == done.to) {
                        state.manifest.remove(&done.to);
                    }
                }
                instance.unstage(&moves);
                return Err(err);
            }
        }

        for m in &moves {
            state.manifest.remove(&m.from);
        }
        for m in moves {
            let mut entry = m.entry;
            entry.used = state.tick();
            state.manifest.insert(m.to, entry);
        }
        Ok(())
    }

    fn delete_prefix(&self, resource: &InstanceKey, prefix: &[u8]) -> EngineResult<()> {
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        for key in state.keys_with_prefix(prefix) {
            instance.remove_value(&key)?;
            state.manifest.remove(&key);
        }
        Ok(())
    }

    fn set_instance_limits(&self, resource: &InstanceKey, limits: &Limits) -> EngineResult<()> {
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        state.limits = *limits;
        instance.apply_limits(&mut state)
    }

    fn cleanup_snapshots(&self, resource: &InstanceKey) -> EngineResult<()> {
        let instance = self.instance(resource)?;
        // Staging only happens under the state lock.
        let _state = instance.state.lock();
        let staging = instance.dir.join(STAGING_DIR);
        let mut removed = 0;
        for dirent in fs::read_dir(&staging).map_err(|e| EngineError::io(&staging, e))? {
            let path = dirent.map_err(|e| EngineError::io(&staging, e))?.path();
            not_found_ok(fs::remove_file(&path)).map_err(|e| EngineError::io(&path, e))?;
            removed += 1;
        }
        log::debug!("removed {removed} staging files from {staging:?}");
        Ok(())
    }

    fn read_snapshot(
        &self,
        resource: &InstanceKey,
        keys: &[Vec<u8>],
    ) -> EngineResult<Vec<Option<SnapshotValue>>> {
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        keys.iter()
            .map(|key| match state.touch(key) {
                Some(stat) => Ok(Some(SnapshotValue {
                    stat,
                    bytes: instance.read_file(key)?,
                })),
                None => Ok(None),
            })
            .collect()
    }

    fn commit_batch(
        &self,
        resource: &InstanceKey,
        writes: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> EngineResult<()> {
        for (key, _) in &writes {
            check_key(key)?;
        }
        let instance = self.instance(resource)?;
        let mut state = instance.state.lock();
        // Stage everything before anything becomes visible.
        let mut staged = Vec::with_capacity(writes.len());
        for (key, buf) in writes {
            match instance.stage(&buf) {
                Ok(path) => staged.push((key, path, buf.len() as u64)),
                Err(err) => {
                    for (_, path, _) in &staged {
                        instance.discard(path);
                    }
                    return Err(err);
                }
            }
        }
        let mut staged = staged.into_iter();
        while let Some((key, path, size)) = staged.next() {
            if let Err(err) = instance.publish(&path, &key) {
                for (_, rest, _) in staged {
                    instance.discard(&rest);
                }
                return Err(err);
            }
            state.written(key, size);
        }
        instance.apply_limits(&mut state)
    }
}
