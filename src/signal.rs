//! One-shot, multi-observer signal.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Set exactly once, after a cell's value has been released.
///
/// Observers may poll with [`is_set`](Self::is_set) or block with
/// [`wait`](Self::wait). The signal is purely observational: nothing in the
/// crate waits on it for correctness.
#[derive(Debug, Default)]
pub struct ReleasedSignal {
    set: Mutex<bool>,
    cond: Condvar,
}

impl ReleasedSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Panics if called twice; release happens exactly once.
    pub(crate) fn set(&self) {
        let mut set = self.set.lock();
        assert!(!*set, "released signal set twice");
        *set = true;
        drop(set);
        self.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Block until the signal is set.
    pub fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.cond.wait(&mut set);
        }
    }

    /// Block until the signal is set or `timeout` elapses. Returns whether it
    /// was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.set.lock();
        if *set {
            return true;
        }
        // wait_while_for handles spurious wakeups against one deadline.
        let _ = self.cond.wait_while_for(&mut set, |set| !*set, timeout);
        *set
    }
}
