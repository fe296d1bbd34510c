//! CountedMap: per-entry live-reference counting atop HandleMap.
//!
//! `acquire` is get-or-insert plus subscribe in one call; `release`
//! unsubscribes and removes the entry in the same call when the count
//! reaches zero. Callers serialize both behind one lock, so no caller can
//! ever see an entry whose count is zero.

use crate::handle_map::{Handle, HandleMap};
use crate::tokens::{RefCount, Ticket};
use core::borrow::Borrow;

#[derive(Debug)]
pub(crate) struct Counted<V> {
    refs: RefCount,
    value: V,
}

pub(crate) struct CountedMap<K, V> {
    inner: HandleMap<K, Counted<V>>,
}

/// One registered live reference on an entry. Must be handed back to
/// [`CountedMap::release`] on the map that produced it.
#[derive(Debug)]
pub(crate) struct CountedHandle {
    handle: Handle,
    ticket: Ticket,
}

/// Outcome of releasing a handle.
#[derive(Debug)]
pub(crate) enum Release<K, V> {
    Live,
    Removed { key: K, value: V },
}

impl<K, V> CountedMap<K, V>
where
    K: Eq,
{
    pub(crate) fn new() -> Self {
        Self {
            inner: HandleMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub(crate) fn contains_key<Q>(&self, hash: u64, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.inner.find(hash, q).is_some()
    }

    /// Live references currently registered for `q`; zero when absent.
    pub(crate) fn live_references<Q>(&self, hash: u64, q: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.inner
            .find(hash, q)
            .and_then(|h| self.inner.value(h))
            .map_or(0, |c| c.refs.get())
    }

    /// Resolve or create the entry for `key` and register one live
    /// reference on it. `make` runs only when the entry is created.
    /// Returns the handle and whether the entry was created.
    pub(crate) fn acquire<F>(&mut self, hash: u64, key: K, make: F) -> (CountedHandle, bool)
    where
        F: FnOnce() -> V,
    {
        let (handle, created) = self.inner.find_or_insert_with(hash, key, || Counted {
            refs: RefCount::new(),
            value: make(),
        });
        let entry = self
            .inner
            .value(handle)
            .expect("entry must exist right after find_or_insert");
        let ticket = entry.refs.subscribe();
        (CountedHandle { handle, ticket }, created)
    }

    pub(crate) fn value(&self, h: &CountedHandle) -> &V {
        &self
            .inner
            .value(h.handle)
            .expect("entry must stay live while a CountedHandle is outstanding")
            .value
    }

    pub(crate) fn key(&self, h: &CountedHandle) -> &K {
        self.inner
            .key(h.handle)
            .expect("entry must stay live while a CountedHandle is outstanding")
    }

    pub(crate) fn refs(&self, h: &CountedHandle) -> usize {
        self.inner
            .value(h.handle)
            .map_or(0, |c| c.refs.get())
    }

    /// Return a live reference; removes and yields the entry at zero.
    pub(crate) fn release(&mut self, h: CountedHandle) -> Release<K, V> {
        let CountedHandle { handle, ticket } = h;
        let entry = self
            .inner
            .value(handle)
            .expect("CountedHandle must refer to a live entry when released");
        if !entry.refs.unsubscribe(ticket) {
            return Release::Live;
        }
        let (key, counted) = self
            .inner
            .remove(handle)
            .expect("entry must exist when its count reaches zero");
        Release::Removed {
            key,
            value: counted.value,
        }
    }
}
