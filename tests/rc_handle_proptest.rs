// RcHandle property tests.
//
// Property 1: release happens exactly once, after the last put.
//  - Model: a Vec of live references.
//  - Operations: clone one live reference, put one, implicitly drop one.
//  - Invariant: release count is 0 while any reference is live, and
//    ref_count() equals the number of live references.
//
// Property 2: a Handle admits exactly the operations issued before close.
//  - Model: closed flag.
//  - Operations: put, get, close; results must match the flag.
use proptest::prelude::*;
use rc_guard::{DirEngine, Error, Handle, Options, RcHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

proptest! {
    #[test]
    fn prop_release_after_last_put(ops in proptest::collection::vec((0u8..=2u8, 0usize..100usize), 1..200)) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let mut live = vec![RcHandle::new(42u64, move |v| {
            assert_eq!(v, 42);
            c.fetch_add(1, Ordering::SeqCst);
        })];
        let signal = live[0].released();

        for (op, raw) in ops {
            if live.is_empty() {
                break;
            }
            let i = raw % live.len();
            match op {
                // Clone one existing reference.
                0 => {
                    let cloned = live[i].clone();
                    prop_assert_eq!(*cloned, 42);
                    live.push(cloned);
                }
                // Put one explicitly.
                1 => {
                    let mut r = live.swap_remove(i);
                    r.put();
                }
                // Drop one without a put; still counted.
                2 => {
                    drop(live.swap_remove(i));
                }
                _ => unreachable!(),
            }

            if live.is_empty() {
                prop_assert_eq!(calls.load(Ordering::SeqCst), 1);
                prop_assert!(signal.is_set());
            } else {
                prop_assert_eq!(calls.load(Ordering::SeqCst), 0);
                prop_assert!(!signal.is_set());
                prop_assert_eq!(live[0].ref_count(), live.len() as isize);
            }
        }

        for mut r in live.drain(..) {
            r.put();
        }
        prop_assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_admission_follows_closed_flag(ops in proptest::collection::vec((0u8..=2u8, 0usize..4usize), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(DirEngine::new());
        let handle = Handle::open_with(Arc::clone(&engine), dir.path(), Options::default()).unwrap();
        let mut closed = false;

        for (op, k) in ops {
            let key = format!("k{k}");
            match op {
                0 => {
                    let res = handle.put_buf(&key, key.as_bytes());
                    prop_assert_eq!(res.is_ok(), !closed);
                }
                1 => match handle.get_buf(&key) {
                    Ok(v) => {
                        prop_assert!(!closed);
                        prop_assert_eq!(v, key.as_bytes().to_vec());
                    }
                    Err(Error::HandleClosed) => prop_assert!(closed),
                    Err(err) => {
                        prop_assert!(!closed);
                        prop_assert!(err.is_no_such_key());
                    }
                },
                2 => {
                    handle.close().unwrap();
                    closed = true;
                    prop_assert!(handle.released().is_set());
                }
                _ => unreachable!(),
            }
            prop_assert_eq!(engine.open_instances(), usize::from(!closed));
        }
        handle.close().unwrap();
    }
}
