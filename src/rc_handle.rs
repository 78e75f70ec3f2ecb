//! RcHandle: an atomically counted reference to a value that must be
//! released explicitly, exactly once.
//!
//! Every handle is a token for one count. `clone` mints a new token, `put`
//! returns one. The put that takes the count to zero moves the value out of
//! the shared cell, passes it to the release function and then sets the
//! [`ReleasedSignal`].
//!
//! Putting the same token twice, or cloning after the value was released,
//! are bugs in the caller's sequencing and panic. A token dropped without a
//! put is still returned to the count (and optionally reported, see
//! [`LeakCheck`]).

use crate::count::AtomicCount;
use crate::leak::LeakCheck;
use crate::signal::ReleasedSignal;
use core::cell::UnsafeCell;
use core::fmt;
use core::ops::Deref;
use parking_lot::Mutex;
use std::sync::Arc;

type ReleaseFn<T> = Box<dyn FnOnce(T) + Send>;

struct Inner<T> {
    count: AtomicCount,
    // Only taken by the thread whose put reached zero. Read through live
    // tokens before that.
    value: UnsafeCell<Option<T>>,
    release: Mutex<Option<ReleaseFn<T>>>,
    released: Arc<ReleasedSignal>,
    leak_check: LeakCheck,
}

// SAFETY: shared access to `value` hands out `&T` to any thread holding a
// token (needs `T: Sync`); the final put moves `T` out on whichever thread
// performs it (needs `T: Send`). The count orders the two.
unsafe impl<T: Send + Sync> Sync for Inner<T> {}

impl<T> Inner<T> {
    fn put_ref(&self) {
        if self.count.put() {
            self.release_value();
        }
    }

    fn release_value(&self) {
        // SAFETY: the count is zero and every token is consumed, so no
        // reference into `value` is alive and none can be created again.
        let value = unsafe { (*self.value.get()).take() };
        let value = value.expect("rc value released twice");
        let release = self.release.lock().take();
        match release {
            Some(release) => release(value),
            None => unreachable!("release fn missing with value present"),
        }
        self.released.set();
    }
}

/// One counted reference to a shared value.
pub struct RcHandle<T> {
    inner: Arc<Inner<T>>,
    consumed: bool,
}

impl<T> RcHandle<T> {
    /// Wrap `value` with a count of one. `release` runs exactly once, when
    /// the last reference is put.
    pub fn new<F>(value: T, release: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self::with_leak_check(value, release, LeakCheck::Off)
    }

    /// Like [`new`](Self::new), reporting references that are dropped
    /// without [`put`](Self::put) according to `leak_check`.
    pub fn with_leak_check<F>(value: T, release: F, leak_check: LeakCheck) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                count: AtomicCount::new(),
                value: UnsafeCell::new(Some(value)),
                release: Mutex::new(Some(Box::new(release))),
                released: Arc::new(ReleasedSignal::new()),
                leak_check,
            }),
            consumed: false,
        }
    }

    /// Return this reference. Releases the value if it was the last one.
    ///
    /// Panics if this reference was already put.
    pub fn put(&mut self) {
        assert!(!self.consumed, "rc handle put twice");
        self.consumed = true;
        self.inner.put_ref();
    }

    /// Borrow the value. The borrow cannot outlive this reference, so the
    /// value cannot be released underneath it.
    ///
    /// Panics if this reference was already put.
    pub fn get(&self) -> &T {
        assert!(!self.consumed, "rc handle used after put");
        // SAFETY: this token still holds a count, so the value has not been
        // taken, and `put` needs `&mut self` so it cannot run while the
        // returned borrow lives.
        let value = unsafe { &*self.inner.value.get() };
        value.as_ref().expect("live rc handle without value")
    }

    /// The signal set once the value has been released. Usable after every
    /// reference is gone.
    pub fn released(&self) -> Arc<ReleasedSignal> {
        Arc::clone(&self.inner.released)
    }

    /// Whether this particular reference has been put.
    pub fn is_put(&self) -> bool {
        self.consumed
    }

    /// Number of live references across all clones. Racy.
    pub fn ref_count(&self) -> isize {
        self.inner.count.load()
    }

    /// Whether both references share one cell.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl<T> Clone for RcHandle<T> {
    /// Panics if this reference was already put, or if the value was
    /// already released.
    fn clone(&self) -> Self {
        assert!(!self.consumed, "clone of put rc handle");
        self.inner.count.get();
        Self {
            inner: Arc::clone(&self.inner),
            consumed: false,
        }
    }
}

impl<T> Deref for RcHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T> Drop for RcHandle<T> {
    fn drop(&mut self) {
        if self.consumed {
            return;
        }
        self.consumed = true;
        self.inner.put_ref();
        self.inner.leak_check.report("rc handle");
    }
}

impl<T> fmt::Debug for RcHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcHandle")
            .field("count", &self.inner.count.load())
            .field("consumed", &self.consumed)
            .field("released", &self.inner.released.is_set())
            .finish()
    }
}
