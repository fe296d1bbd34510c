//! KeyedCriticalSection: per-key mutual exclusion with reclaimed slots.
//!
//! Layout: `N` shards, each a `parking_lot::Mutex` around a `CountedMap`
//! from key to slot (`Arc<Mutex<()>>`). The shard lock only covers map
//! bookkeeping; it is never held while a caller waits on a slot or runs
//! its work.
//!
//! Lifecycle of one caller:
//! 1. Hash the key once and pick its shard.
//! 2. Under the shard lock, get-or-insert the slot and register a live
//!    reference (a `Subscription`).
//! 3. Outside the shard lock, block on the slot mutex.
//! 4. On drop of the guard: release the slot mutex, then under the shard
//!    lock unregister; the last reference removes the entry.
//!
//! Steps 2 and 4 serialize on the same shard lock, so "count reached zero"
//! and "entry removed" are one atomic step as seen by every other caller.
//! A late arrival either registers before the decrement (and the entry
//! stays) or after the removal (and builds a fresh slot nobody else holds).

use crate::config::RegistryConfig;
use crate::counted_map::{CountedHandle, CountedMap, Release};
use crate::error::{Error, Result};
use crate::reentrancy::ReentrancyGuard;
use core::borrow::Borrow;
use core::hash::{BuildHasher, Hash};
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use parking_lot::{ArcMutexGuard, Mutex, MutexGuard, RawMutex};
use std::collections::hash_map::RandomState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

type SlotLock = Arc<Mutex<()>>;
type SlotGuard = ArcMutexGuard<RawMutex, ()>;

struct Shard<K> {
    map: Mutex<CountedMap<K, SlotLock>>,
}

/// A locked shard map, taken only after marking this thread as inside the
/// registry. A key's `Eq` that calls back into the registry panics instead
/// of blocking on a shard lock its own thread holds.
struct ShardAccess<'a, K> {
    // Unlocked before the reentrancy mark is cleared.
    map: MutexGuard<'a, CountedMap<K, SlotLock>>,
    _entered: ReentrancyGuard,
}

impl<K> Deref for ShardAccess<'_, K> {
    type Target = CountedMap<K, SlotLock>;

    fn deref(&self) -> &Self::Target {
        &self.map
    }
}

impl<K> DerefMut for ShardAccess<'_, K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.map
    }
}

/// Registry granting at most one concurrent execution per key.
///
/// ```
/// use keyed_section::KeyedCriticalSection;
///
/// let sections = KeyedCriticalSection::new();
/// let saved = sections.run_exclusive("item-42".to_string(), || "saved");
/// assert_eq!(saved, "saved");
/// assert!(sections.is_empty());
/// ```
pub struct KeyedCriticalSection<K, S = RandomState> {
    hasher: S,
    shards: Box<[Shard<K>]>,
    shard_bits: u32,
    config: RegistryConfig,
}

impl<K> KeyedCriticalSection<K>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::build(RegistryConfig::default(), RandomState::new())
    }

    pub fn with_config(config: RegistryConfig) -> Result<Self> {
        Self::with_config_and_hasher(config, RandomState::new())
    }
}

impl<K> Default for KeyedCriticalSection<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> KeyedCriticalSection<K, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::build(RegistryConfig::default(), hasher)
    }

    pub fn with_config_and_hasher(config: RegistryConfig, hasher: S) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, hasher))
    }

    fn build(config: RegistryConfig, hasher: S) -> Self {
        let count = config.effective_shard_count();
        let shards = (0..count)
            .map(|_| Shard {
                map: Mutex::new(CountedMap::new()),
            })
            .collect();
        Self {
            hasher,
            shards,
            shard_bits: count.trailing_zeros(),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, index: usize) -> ShardAccess<'_, K> {
        // The address is stable while any shard is borrowed, which is as
        // long as the mark lives.
        let entered = ReentrancyGuard::enter(self as *const Self as usize);
        ShardAccess {
            map: self.shards[index].map.lock(),
            _entered: entered,
        }
    }

    // hashbrown reads the top 7 bits for its control bytes and the low bits
    // for bucket selection, so the shard comes from the bits just below the
    // top 7.
    #[inline]
    fn shard_index(&self, hash: u64) -> usize {
        if self.shard_bits == 0 {
            return 0;
        }
        ((hash << 7) >> (64 - self.shard_bits)) as usize
    }

    /// Number of keys that currently have a live slot. Each shard is read
    /// under its own lock, so under concurrent use this is a snapshot per
    /// shard rather than across the whole registry.
    pub fn len(&self) -> usize {
        (0..self.shards.len()).map(|i| self.shard(i).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        (0..self.shards.len()).all(|i| self.shard(i).is_empty())
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(q);
        self.shard(self.shard_index(hash)).contains_key(hash, q)
    }

    /// Callers currently holding or waiting for the slot of `q`.
    pub fn live_references<Q>(&self, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = self.hasher.hash_one(q);
        self.shard(self.shard_index(hash)).live_references(hash, q)
    }

    fn subscribe(&self, key: K) -> Subscription<'_, K, S> {
        let hash = self.hasher.hash_one(&key);
        let shard = self.shard_index(hash);
        let mut map = self.shard(shard);
        let (handle, created) = map.acquire(hash, key, || Arc::new(Mutex::new(())));
        let slot = Arc::clone(map.value(&handle));
        if created {
            trace!(shard, "created slot");
        }
        drop(map);
        Subscription {
            registry: self,
            shard,
            handle: ManuallyDrop::new(handle),
            slot,
        }
    }

    fn unsubscribe(&self, shard: usize, handle: CountedHandle) {
        let released = self.shard(shard).release(handle);
        // The key and slot are dropped here, after the shard lock is gone.
        if let Release::Removed { .. } = released {
            trace!(shard, "reclaimed slot");
        }
    }

    /// Block until the slot for `key` is free and take it. The slot is
    /// released, and reclaimed if nobody else wants it, when the guard
    /// drops.
    pub fn lock(&self, key: K) -> ExclusiveGuard<'_, K, S> {
        let sub = self.subscribe(key);
        let slot = sub.slot.lock_arc();
        ExclusiveGuard { _slot: slot, sub }
    }

    /// Take the slot for `key` only if nobody holds it right now.
    pub fn try_lock(&self, key: K) -> Option<ExclusiveGuard<'_, K, S>> {
        let sub = self.subscribe(key);
        let slot = sub.slot.try_lock_arc()?;
        Some(ExclusiveGuard { _slot: slot, sub })
    }

    /// Like [`lock`](Self::lock) but gives up after `timeout`. On timeout
    /// the caller's registration is withdrawn before the error returns.
    pub fn lock_timeout(&self, key: K, timeout: Duration) -> Result<ExclusiveGuard<'_, K, S>> {
        let sub = self.subscribe(key);
        match sub.slot.try_lock_arc_for(timeout) {
            Some(slot) => Ok(ExclusiveGuard { _slot: slot, sub }),
            None => {
                debug!(shard = sub.shard, ?timeout, "timed out waiting for slot");
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Run `work` with exclusive access to `key`. Calls with equal keys
    /// never overlap; calls with different keys do not wait on each other.
    /// A panic in `work` propagates after the slot has been released.
    pub fn run_exclusive<R, F>(&self, key: K, work: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = self.lock(key);
        work()
    }

    pub fn run_exclusive_timeout<R, F>(&self, key: K, timeout: Duration, work: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        let _guard = self.lock_timeout(key, timeout)?;
        Ok(work())
    }

    /// Run `work` under the configured wait bound, or unbounded when the
    /// configuration sets none.
    pub fn run_bounded<R, F>(&self, key: K, work: F) -> Result<R>
    where
        F: FnOnce() -> R,
    {
        match self.config.wait_timeout() {
            Some(timeout) => self.run_exclusive_timeout(key, timeout, work),
            None => Ok(self.run_exclusive(key, work)),
        }
    }
}

impl<K, S> core::fmt::Debug for KeyedCriticalSection<K, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeyedCriticalSection")
            .field("shards", &self.shard_count())
            .field("live_slots", &self.len())
            .finish()
    }
}

/// A registered live reference on a slot; unregisters on drop.
struct Subscription<'r, K, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    registry: &'r KeyedCriticalSection<K, S>,
    shard: usize,
    handle: ManuallyDrop<CountedHandle>,
    slot: SlotLock,
}

impl<K, S> Drop for Subscription<'_, K, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn drop(&mut self) {
        // SAFETY: `handle` is taken exactly once, here, and never touched again.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        self.registry.unsubscribe(self.shard, handle);
    }
}

/// Exclusive access to one key. Dropping it releases the slot mutex first,
/// then the live reference, reclaiming the slot if this was the last one.
#[must_use = "the critical section ends as soon as the guard is dropped"]
pub struct ExclusiveGuard<'r, K, S = RandomState>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    // Declared before `sub`: fields drop in order, and the mutex must be
    // unlocked before the reference that keeps the slot registered goes.
    _slot: SlotGuard,
    sub: Subscription<'r, K, S>,
}

impl<K, S> ExclusiveGuard<'_, K, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    /// Live references on this guard's slot, including the guard itself.
    pub fn live_references(&self) -> usize {
        self.sub.registry.shard(self.sub.shard).refs(&self.sub.handle)
    }

    /// A copy of the guarded key. Only the clone runs under the shard lock.
    pub fn key(&self) -> K
    where
        K: Clone,
    {
        self.sub.registry.shard(self.sub.shard).key(&self.sub.handle).clone()
    }
}

impl<K, S> core::fmt::Debug for ExclusiveGuard<'_, K, S>
where
    K: Eq + Hash,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExclusiveGuard")
            .field("shard", &self.sub.shard)
            .finish_non_exhaustive()
    }
}
