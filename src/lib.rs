//! keyed-section: keyed critical sections for threads, with per-key locks
//! that exist only while someone needs them.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: calls sharing a key never run their work at the same time;
//!   calls with different keys never wait on each other's work; and the
//!   registry forgets a key as soon as its last caller leaves.
//! - Layers:
//!   - HandleMap<K, V>: structural map over precomputed hashes that hands
//!     out stable, generational handles.
//!   - CountedMap<K, V>: wraps HandleMap with a live-reference count per
//!     entry. `acquire` is get-or-insert plus subscribe; `release`
//!     unsubscribes and removes the entry at zero.
//!   - KeyedCriticalSection<K, S>: public API. Shards of
//!     `Mutex<CountedMap<K, Arc<Mutex<()>>>>`, RAII guards, and
//!     `run_exclusive`.
//!   - service: check-lock-check item saving built on the registry.
//!
//! Constraints
//! - Multi-threaded: the registry is `Send + Sync`; guards are `!Send`
//!   and must be dropped on the thread that took them.
//! - Subscribe and release for a key both run under that key's shard lock.
//!   That lock is held for O(1) map work only, never across a wait on a
//!   slot or across user work.
//! - A slot is allocated only when its key is absent; a lookup that finds
//!   an existing slot allocates nothing.
//! - Non-reentrant: taking the same key again from inside its own
//!   critical section deadlocks.
//! - `K: Eq` runs under a shard lock. An `Eq` impl that calls back into
//!   the same registry panics (via a per-thread reentrancy mark taken
//!   before every shard lock) instead of deadlocking on that lock.
//!
//! Why this split?
//! - Localize invariants: the handle layer owns structure, the counted
//!   layer owns "present iff referenced", the registry owns locking.
//! - Fail fast on bookkeeping bugs: every live reference is a linear
//!   `Ticket` that panics if dropped instead of returned.
//!
//! Failure semantics
//! - Work's return value (including any `Result`) is passed through
//!   untouched, and panics propagate. Cleanup runs in `Drop`, so the slot
//!   is released and reclaimed on every exit path.
//! - `parking_lot` locks do not poison; a panicking caller leaves the
//!   registry fully usable.
//!
//! Hasher invariants
//! - Each key is hashed once per call, outside any lock. Entries store
//!   that hash, so index growth never calls `K: Hash`. Only `K: Eq` runs
//!   under a shard lock.
//!
//! Notes and non-goals
//! - Single process, in memory. No fairness beyond what `parking_lot`
//!   provides.
//! - Reference-count overflow aborts, matching `Rc`.

mod config;
mod counted_map;
mod error;
mod handle_map;
mod reentrancy;
mod registry;
pub mod service;
pub mod tokens;

// Public surface
pub use config::{RegistryConfig, ServiceConfig, DEFAULT_SHARD_COUNT, MAX_SHARD_COUNT};
pub use error::{BackendError, Error, Result};
pub use registry::{ExclusiveGuard, KeyedCriticalSection};
