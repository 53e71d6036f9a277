//! The exchange engine.
//!
//! [`Exchange`] is the facade every caller (HTTP handlers, tests, other
//! services) goes through. Its operations are grouped by component:
//!
//! - [`items`]: the item store (listing, lookup, owner status changes)
//! - [`requests`]: the request store (claims on items)
//! - [`coordinator`]: acceptance, rejection and completion, the only
//!   operations that chain a request change with an item change
//! - [`channel`]: the message log bound to a request
//!
//! Each operation is an independent unit of work. Guards are evaluated against
//! a fresh read and then re-checked atomically by the storage backend, so a
//! failed call leaves every record exactly as it was.

use std::sync::Arc;

use crate::config::ExchangeConfig;
use crate::domain::item::Item;
use crate::domain::request::{AnyRequest, RequestId};
use crate::error::{HandoverError, Result};
use crate::manager::Storage;
use crate::manager::memory::InMemoryStorage;

pub mod channel;
pub mod coordinator;
pub mod items;
pub mod requests;

/// Exchange engine over a storage backend.
pub struct Exchange<S: Storage> {
    storage: Arc<S>,
    config: ExchangeConfig,
}

impl<S: Storage> Clone for Exchange<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: Storage> Exchange<S> {
    /// Create an engine with the default configuration.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            config: ExchangeConfig::default(),
        }
    }

    /// Set a custom configuration.
    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Load a request together with its item.
    async fn load_request(&self, request_id: RequestId) -> Result<(AnyRequest, Item)> {
        let request = self.storage.get_request(request_id).await?;
        let item = self.storage.get_item(request.data().item_id).await?;
        Ok((request, item))
    }
}

impl Exchange<InMemoryStorage> {
    /// Engine over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }
}

/// Trimmed, non-empty, bounded text.
fn required_text(field: &str, value: &str, max_len: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(HandoverError::Validation(format!("{} must not be empty", field)));
    }
    bounded_text(field, trimmed, max_len)
}

/// Trimmed text of at most `max_len` characters (may be empty).
fn bounded_text(field: &str, value: &str, max_len: usize) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.chars().count() > max_len {
        return Err(HandoverError::Validation(format!(
            "{} exceeds {} character limit",
            field, max_len
        )));
    }
    Ok(trimmed.to_string())
}

/// Count lost compare-and-swap races per operation.
fn note_conflict(operation: &'static str) -> impl Fn(&HandoverError) {
    move |err| {
        if err.is_retryable() {
            metrics::counter!("handover_conflicts_total", "operation" => operation).increment(1);
            tracing::warn!(operation, error = %err, "Lost a race on a conditional update");
        }
    }
}
