//! Atomic reference counter with fail-fast misuse checks.
//!
//! The counter starts at one and is the only authority on when a cell's
//! value may be released. Incrementing a counter that already reached zero,
//! or decrementing below zero, means a reference was used after its
//! lifetime ended; both panic instead of returning an error.

use core::sync::atomic::{fence, AtomicIsize, Ordering};

#[derive(Debug)]
pub(crate) struct AtomicCount {
    count: AtomicIsize,
}

impl AtomicCount {
    /// A counter holding the single reference minted at construction.
    pub(crate) const fn new() -> Self {
        Self {
            count: AtomicIsize::new(1),
        }
    }

    /// Acquire one more reference. The caller must already hold one.
    #[inline]
    pub(crate) fn get(&self) {
        // Relaxed is enough: a new reference can only be created from an
        // existing one, which already synchronizes with the value.
        let prev = self.count.fetch_add(1, Ordering::Relaxed);
        if prev == isize::MAX {
            // Same policy as Arc: continuing after overflow is unsound.
            std::process::abort();
        }
        assert!(prev >= 1, "rc value already released (count was {prev})");
    }

    /// Return one reference. Returns true when this was the last one.
    #[inline]
    #[must_use]
    pub(crate) fn put(&self) -> bool {
        let prev = self.count.fetch_sub(1, Ordering::Release);
        match prev {
            1 => {
                // Pairs with the Release above on every other put, so the
                // releasing thread sees all uses of the value.
                fence(Ordering::Acquire);
                true
            }
            p if p > 1 => false,
            p => panic!("rc count underflow (count was {p})"),
        }
    }

    /// Current count. Racy; for diagnostics only.
    #[inline]
    pub(crate) fn load(&self) -> isize {
        self.count.load(Ordering::Relaxed)
    }
}
