//! Shard-pinned bindings of record types.
//!
//! A binding wraps a logical record type together with the shard handle every
//! connection-dependent operation on it must use. Exactly one binding exists per
//! (record type, shard) pair for the lifetime of the cache.

use crate::db::{DbPool, ShardHandle};
use crate::models::RecordType;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A record type pinned to one shard.
#[derive(Debug)]
pub struct ShardedBinding {
    /// "{shard}::{type}", e.g. "Shard0::Widget".
    name: String,
    record_type: Arc<RecordType>,
    handle: Arc<ShardHandle>,
}

impl ShardedBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The un-bound logical type.
    pub fn record_type(&self) -> &Arc<RecordType> {
        &self.record_type
    }

    /// The shard this binding is pinned to.
    pub fn handle(&self) -> &Arc<ShardHandle> {
        &self.handle
    }

    pub fn pool(&self) -> &DbPool {
        self.handle.pool()
    }
}

impl Deref for ShardedBinding {
    type Target = RecordType;

    fn deref(&self) -> &RecordType {
        &self.record_type
    }
}

/// Cache of generated bindings, keyed by (record type identity, shard id). Never evicted.
#[derive(Debug, Default)]
pub struct BindingCache {
    bindings: RwLock<HashMap<(usize, usize), Arc<ShardedBinding>>>,
}

impl BindingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the binding of `record_type` to `handle`.
    pub fn binding_for(
        &self,
        record_type: &Arc<RecordType>,
        handle: &Arc<ShardHandle>,
    ) -> Arc<ShardedBinding> {
        // Keyed by identity; the binding keeps the type alive, so the address is never reused
        let key = (Arc::as_ptr(record_type) as usize, handle.id());

        {
            let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(binding) = bindings.get(&key) {
                return Arc::clone(binding);
            }
        }

        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        // Double-check after acquiring write lock
        let binding = bindings.entry(key).or_insert_with(|| {
            let binding = ShardedBinding {
                name: format!("{}::{}", handle.name(), record_type.name()),
                record_type: Arc::clone(record_type),
                handle: Arc::clone(handle),
            };
            debug!(binding = %binding.name, shard_id = handle.id(), "Generated shard binding");
            Arc::new(binding)
        });
        Arc::clone(binding)
    }

    /// Number of generated bindings.
    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
