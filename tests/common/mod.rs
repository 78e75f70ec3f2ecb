//! Instrumented in-memory engine for lifecycle tests.
#![allow(dead_code)]

use rc_guard::{Engine, EngineError, EngineResult, Item, Limits, SnapshotValue, Stat};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::time::SystemTime;

/// Blocks the next `single_read_at` until released by the test.
struct Gate {
    entered: Sender<()>,
    proceed: Receiver<()>,
}

#[derive(Default)]
pub struct MockEngine {
    next_id: AtomicU64,
    live: Mutex<HashSet<u64>>,
    values: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    gate: Mutex<Option<Gate>>,
    pub fail_open: AtomicBool,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    /// Operations that reached the engine, excluding open and close.
    pub calls: AtomicUsize,
    /// Operations that reached the engine with a released resource.
    pub invalid_uses: AtomicUsize,
}

impl MockEngine {
    /// Arm the gate. Returns a receiver signalled when a read is inside the
    /// engine, and a sender that lets it finish.
    pub fn arm_gate(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = channel();
        let (proceed_tx, proceed_rx) = channel();
        *self.gate.lock().unwrap() = Some(Gate {
            entered: entered_tx,
            proceed: proceed_rx,
        });
        (entered_rx, proceed_tx)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invalid_uses(&self) -> usize {
        self.invalid_uses.load(Ordering::SeqCst)
    }

    fn check(&self, id: &u64) -> EngineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.live.lock().unwrap().contains(id) {
            Ok(())
        } else {
            self.invalid_uses.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::InvalidHandle)
        }
    }

    fn stat_of(value: &[u8]) -> Stat {
        Stat {
            size: value.len() as u64,
            last_used: SystemTime::UNIX_EPOCH,
        }
    }
}

impl Engine for MockEngine {
    type Resource = u64;

    fn open(&self, location: &Path) -> EngineResult<u64> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(EngineError::InvalidKey(format!("{location:?}")));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().insert(id);
        Ok(id)
    }

    fn close(&self, resource: u64) {
        assert!(
            self.live.lock().unwrap().remove(&resource),
            "engine close of unknown resource"
        );
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn single_stat(&self, r: &u64, key: &[u8]) -> EngineResult<Option<Stat>> {
        self.check(r)?;
        Ok(self.values.lock().unwrap().get(key).map(|v| Self::stat_of(v)))
    }

    fn write_single_buf(&self, r: &u64, key: &[u8], buf: &[u8]) -> EngineResult<u64> {
        self.check(r)?;
        self.values.lock().unwrap().insert(key.to_vec(), buf.to_vec());
        Ok(buf.len() as u64)
    }

    fn read_single_buf(&self, r: &u64, key: &[u8]) -> EngineResult<Vec<u8>> {
        self.check(r)?;
        self.values
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(EngineError::NoSuchKey)
    }

    fn single_read_at(&self, r: &u64, key: &[u8], buf: &mut [u8], offset: u64) -> EngineResult<usize> {
        self.check(r)?;
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.send(()).unwrap();
            gate.proceed.recv().unwrap();
        }
        // The resource must still be live after the wait.
        self.check(r)?;
        let values = self.values.lock().unwrap();
        let value = values.get(key).ok_or(EngineError::NoSuchKey)?;
        let tail = value.get(offset as usize..).unwrap_or(&[]);
        let n = tail.len().min(buf.len());
        buf[..n].copy_from_slice(&tail[..n]);
        Ok(n)
    }

    fn list_items(&self, r: &u64, prefix: &[u8]) -> EngineResult<Vec<Item>> {
        self.check(r)?;
        let mut items: Vec<_> = self
            .values
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Item {
                key: k.clone(),
                stat: Self::stat_of(v),
            })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    fn single_delete(&self, r: &u64, key: &[u8]) -> EngineResult<Option<Stat>> {
        self.check(r)?;
        Ok(self.values.lock().unwrap().remove(key).map(|v| Self::stat_of(&v)))
    }

    fn rename_item(&self, r: &u64, from: &[u8], to: &[u8]) -> EngineResult<Stat> {
        self.check(r)?;
        let mut values = self.values.lock().unwrap();
        let v = values.remove(from).ok_or(EngineError::NoSuchKey)?;
        let stat = Self::stat_of(&v);
        values.insert(to.to_vec(), v);
        Ok(stat)
    }

    fn move_prefix(&self, r: &u64, from: &[u8], to: &[u8]) -> EngineResult<()> {
        self.check(r)?;
        let mut values = self.values.lock().unwrap();
        let keys: Vec<_> = values.keys().filter(|k| k.starts_with(from)).cloned().collect();
        let moved: Vec<_> = keys
            .into_iter()
            .map(|k| {
                let v = values.remove(&k).unwrap();
                let mut nk = to.to_vec();
                nk.extend_from_slice(&k[from.len()..]);
                (nk, v)
            })
            .collect();
        values.extend(moved);
        Ok(())
    }

    fn delete_prefix(&self, r: &u64, prefix: &[u8]) -> EngineResult<()> {
        self.check(r)?;
        self.values.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    fn set_instance_limits(&self, r: &u64, _limits: &Limits) -> EngineResult<()> {
        self.check(r)
    }

    fn cleanup_snapshots(&self, r: &u64) -> EngineResult<()> {
        self.check(r)
    }

    fn read_snapshot(&self, r: &u64, keys: &[Vec<u8>]) -> EngineResult<Vec<Option<SnapshotValue>>> {
        self.check(r)?;
        let values = self.values.lock().unwrap();
        Ok(keys
            .iter()
            .map(|k| {
                values.get(k).map(|v| SnapshotValue {
                    stat: Self::stat_of(v),
                    bytes: v.clone(),
                })
            })
            .collect())
    }

    fn commit_batch(&self, r: &u64, writes: Vec<(Vec<u8>, Vec<u8>)>) -> EngineResult<()> {
        self.check(r)?;
        self.values.lock().unwrap().extend(writes);
        Ok(())
    }
}
