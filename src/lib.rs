//! rc-guard: reference-counted handles that keep an explicitly released
//! resource alive until the last in-flight operation is done with it.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: close a shared native resource (a storage engine connection)
//!   at any time, from any thread, without blocking on callers that are
//!   still using it and without ever releasing it underneath them.
//! - Layers:
//!   - `AtomicCount`: the counter. Starts at one; incrementing from zero or
//!     decrementing below zero panics.
//!   - `RcHandle<T>`: one counted token per clone over a shared cell that
//!     owns the value, its release function and a one-shot
//!     `ReleasedSignal`. The put that reaches zero releases.
//!   - `Handle<E>`: public facade over one `RcHandle<E::Resource>` with a
//!     closed flag behind a read/write lock. Every operation is admitted
//!     through that lock; `close` flips it and puts its own reference.
//!   - `Engine`: the native capability set, with `DirEngine` as the shipped
//!     implementation.
//!
//! Why two primitives?
//! - The lock decides admission: may a new reference be created.
//! - The count decides release: when is the resource actually gone.
//! - One mutex for both would make close wait for in-flight operations.
//!
//! Failure policy
//! - `Error::HandleClosed` is an ordinary error: the handle was closed
//!   before the operation was admitted.
//! - Double put, clone after release and setting the released signal twice
//!   are sequencing bugs and panic. They are unreachable through `Handle`.
//! - A reference dropped without an explicit put is still returned to its
//!   count. `LeakCheck` decides whether that is reported.
//!
//! Sessions
//! - `Reader` and `Writer` are admitted once and hold their reference until
//!   they end, so a close while a session is open releases the resource
//!   only after the session finishes.
//!
//! Notes and non-goals
//! - In-process only.
//! - No cancellation beyond unwinding: a panicking operation still puts its
//!   reference through a drop guard.

mod count;
pub mod dir_engine;
pub mod engine;
mod error;
mod file_info;
mod handle;
mod leak;
mod options;
mod rc_handle;
mod session;
mod signal;

// Public surface
pub use dir_engine::{DirEngine, InstanceKey};
pub use engine::{Engine, EngineError, EngineResult, Item, Limits, SnapshotValue, Stat};
pub use error::{Error, Result};
pub use file_info::FileInfo;
pub use handle::Handle;
pub use leak::{LeakCheck, ParseLeakCheckError, LEAK_CHECK_ENV};
pub use options::Options;
pub use rc_handle::RcHandle;
pub use session::{Reader, Snapshot, Value, ValueWriter, Writer};
pub use signal::ReleasedSignal;
