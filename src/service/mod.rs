//! Duplicate-safe item saving on top of [`KeyedCriticalSection`].
//!
//! [`KeyedCriticalSection`]: crate::KeyedCriticalSection

mod backend;
mod integration;

pub use backend::{InMemoryBackend, Item, ItemBackend};
pub use integration::{ItemIntegrationService, SaveResult};
