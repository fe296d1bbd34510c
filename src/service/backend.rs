use crate::error::BackendError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    pub content: String,
}

/// Storage the integration service writes through. Implementations are
/// not required to make `find_items_with_content` atomic with `save_item`.
pub trait ItemBackend: Send + Sync {
    fn find_items_with_content(&self, content: &str) -> Result<Vec<Item>, BackendError>;

    fn save_item(&self, content: &str) -> Result<Item, BackendError>;

    fn get_all_items(&self) -> Result<Vec<Item>, BackendError>;
}

impl<B: ItemBackend + ?Sized> ItemBackend for Arc<B> {
    fn find_items_with_content(&self, content: &str) -> Result<Vec<Item>, BackendError> {
        (**self).find_items_with_content(content)
    }

    fn save_item(&self, content: &str) -> Result<Item, BackendError> {
        (**self).save_item(content)
    }

    fn get_all_items(&self) -> Result<Vec<Item>, BackendError> {
        (**self).get_all_items()
    }
}

impl<B: ItemBackend + ?Sized> ItemBackend for &B {
    fn find_items_with_content(&self, content: &str) -> Result<Vec<Item>, BackendError> {
        (**self).find_items_with_content(content)
    }

    fn save_item(&self, content: &str) -> Result<Item, BackendError> {
        (**self).save_item(content)
    }

    fn get_all_items(&self) -> Result<Vec<Item>, BackendError> {
        (**self).get_all_items()
    }
}

#[derive(Debug, Default)]
struct Store {
    items: Vec<Item>,
    next_id: u64,
}

/// In-process backend. Lookups and writes lock the store separately and
/// sleep for their configured latency outside the lock, so a lookup and a
/// later write never form one atomic step.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    store: Mutex<Store>,
    find_latency: Duration,
    save_latency: Duration,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(find_latency: Duration, save_latency: Duration) -> Self {
        Self {
            store: Mutex::default(),
            find_latency,
            save_latency,
        }
    }

    pub fn len(&self) -> usize {
        self.store.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().items.is_empty()
    }
}

fn pause(d: Duration) {
    if !d.is_zero() {
        std::thread::sleep(d);
    }
}

impl ItemBackend for InMemoryBackend {
    fn find_items_with_content(&self, content: &str) -> Result<Vec<Item>, BackendError> {
        pause(self.find_latency);
        let store = self.store.lock();
        Ok(store
            .items
            .iter()
            .filter(|i| i.content == content)
            .cloned()
            .collect())
    }

    fn save_item(&self, content: &str) -> Result<Item, BackendError> {
        pause(self.save_latency);
        let mut store = self.store.lock();
        store.next_id += 1;
        let item = Item {
            id: store.next_id,
            content: content.to_owned(),
        };
        store.items.push(item.clone());
        Ok(item)
    }

    fn get_all_items(&self) -> Result<Vec<Item>, BackendError> {
        Ok(self.store.lock().items.clone())
    }
}
