use rc_guard::RcHandle;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn counted() -> (RcHandle<String>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let h = RcHandle::new("native".to_string(), move |v| {
        assert_eq!(v, "native");
        c.fetch_add(1, Ordering::SeqCst);
    });
    (h, calls)
}

#[test]
fn concurrent_clone_put_releases_exactly_once() {
    const THREADS: usize = 16;
    for _ in 0..20 {
        let (mut original, calls) = counted();
        let signal = original.released();
        let barrier = Barrier::new(THREADS);
        thread::scope(|s| {
            for _ in 0..THREADS {
                let mut mine = original.clone();
                let barrier = &barrier;
                let calls = &calls;
                s.spawn(move || {
                    barrier.wait();
                    for _ in 0..100 {
                        let mut extra = mine.clone();
                        assert_eq!(extra.as_str(), "native");
                        extra.put();
                    }
                    // Not released while this reference is live.
                    assert_eq!(calls.load(Ordering::SeqCst), 0);
                    mine.put();
                });
            }
            // Drop the original while the threads are still running.
            original.put();
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(signal.is_set());
    }
}

#[test]
fn release_waits_for_last_put() {
    let (mut a, calls) = counted();
    let mut refs: Vec<_> = (0..10).map(|_| a.clone()).collect();
    a.put();
    while let Some(mut r) = refs.pop() {
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(r.ref_count(), refs.len() as isize + 1);
        r.put();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn signal_observable_from_other_threads() {
    let (mut a, _calls) = counted();
    let signal = a.released();
    let waiter = thread::spawn(move || signal.wait());
    a.put();
    waiter.join().unwrap();
}
