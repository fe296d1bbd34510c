//! HandleMap: structural layer with stable handles over precomputed hashes.
//!
//! Callers hash keys themselves (the registry hashes once to pick a shard)
//! and pass the `u64` in. Each entry remembers its hash, so rehashing the
//! index never calls back into `K: Hash`.

use core::borrow::Borrow;
use hashbrown::hash_table::Entry as TableEntry;
use hashbrown::HashTable;
use slotmap::{DefaultKey, SlotMap};

/// Generational handle to a map entry. A handle to a removed entry never
/// resolves, even if its storage slot is reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Handle(DefaultKey);

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    hash: u64,
}

pub(crate) struct HandleMap<K, V> {
    index: HashTable<DefaultKey>,
    slots: SlotMap<DefaultKey, Entry<K, V>>,
}

impl<K, V> HandleMap<K, V>
where
    K: Eq,
{
    pub(crate) fn new() -> Self {
        Self {
            index: HashTable::new(),
            slots: SlotMap::with_key(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn find<Q>(&self, hash: u64, q: &Q) -> Option<Handle>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        self.index
            .find(hash, |&k| {
                self.slots
                    .get(k)
                    .map(|e| e.key.borrow() == q)
                    .unwrap_or(false)
            })
            .map(|&k| Handle(k))
    }

    /// Look up `key`, inserting `make()` if it is absent. Returns the handle
    /// and whether a new entry was created. `make` only runs on insertion.
    pub(crate) fn find_or_insert_with<F>(&mut self, hash: u64, key: K, make: F) -> (Handle, bool)
    where
        F: FnOnce() -> V,
    {
        let slots = &mut self.slots;
        match self.index.entry(
            hash,
            |&kk| slots.get(kk).map(|e| e.key == key).unwrap_or(false),
            |&kk| slots.get(kk).map(|e| e.hash).unwrap_or(0),
        ) {
            TableEntry::Occupied(o) => (Handle(*o.get()), false),
            TableEntry::Vacant(v) => {
                let k = slots.insert(Entry {
                    key,
                    value: make(),
                    hash,
                });
                v.insert(k);
                (Handle(k), true)
            }
        }
    }

    pub(crate) fn remove(&mut self, handle: Handle) -> Option<(K, V)> {
        let k = handle.0;
        let entry = self.slots.remove(k)?;
        if let Ok(found) = self.index.find_entry(entry.hash, |&kk| kk == k) {
            let _ = found.remove();
        }
        Some((entry.key, entry.value))
    }

    pub(crate) fn key(&self, h: Handle) -> Option<&K> {
        self.slots.get(h.0).map(|e| &e.key)
    }

    pub(crate) fn value(&self, h: Handle) -> Option<&V> {
        self.slots.get(h.0).map(|e| &e.value)
    }
}
