use super::backend::{Item, ItemBackend};
use crate::config::ServiceConfig;
use crate::error::Result;
use crate::registry::KeyedCriticalSection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Outcome of a save. A duplicate is a normal outcome (`success == false`),
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    pub success: bool,
    pub message: String,
}

impl SaveResult {
    fn saved(item: &Item) -> Self {
        Self {
            success: true,
            message: format!(
                "Item with content {} saved with id {}",
                item.content, item.id
            ),
        }
    }

    fn duplicate(content: &str) -> Self {
        Self {
            success: false,
            message: format!("Duplicate item received with content {content}."),
        }
    }
}

/// Saves items so that at most one item per distinct content is ever
/// stored, while saves of different contents proceed in parallel.
///
/// Safe to call from many threads at once.
pub struct ItemIntegrationService<B> {
    backend: B,
    sections: KeyedCriticalSection<String>,
}

impl<B: ItemBackend> ItemIntegrationService<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            sections: KeyedCriticalSection::new(),
        }
    }

    pub fn with_config(backend: B, config: ServiceConfig) -> Result<Self> {
        Ok(Self {
            backend,
            sections: KeyedCriticalSection::with_config(config.registry)?,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Slots currently live in this service's registry.
    pub fn pending_sections(&self) -> usize {
        self.sections.len()
    }

    /// Save `content` unless an item with the same content already exists.
    ///
    /// The first lookup runs without any lock so that duplicates are
    /// rejected without contention. The lookup is repeated inside the
    /// content's critical section, because another caller may have saved
    /// the same content between the first lookup and taking the section.
    pub fn save_item(&self, content: &str) -> Result<SaveResult> {
        if !self.backend.find_items_with_content(content)?.is_empty() {
            debug!(content, "rejected duplicate before locking");
            return Ok(SaveResult::duplicate(content));
        }

        self.sections
            .run_bounded(content.to_owned(), || self.save_locked(content))?
    }

    fn save_locked(&self, content: &str) -> Result<SaveResult> {
        if !self.backend.find_items_with_content(content)?.is_empty() {
            debug!(content, "rejected duplicate inside critical section");
            return Ok(SaveResult::duplicate(content));
        }

        let item = self.backend.save_item(content)?;
        info!(id = item.id, content, "saved item");
        Ok(SaveResult::saved(&item))
    }

    pub fn get_all_items(&self) -> Result<Vec<Item>> {
        Ok(self.backend.get_all_items()?)
    }
}

impl<B> core::fmt::Debug for ItemIntegrationService<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ItemIntegrationService")
            .field("sections", &self.sections)
            .finish_non_exhaustive()
    }
}
