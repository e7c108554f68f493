//! Connection resolution.
//!
//! [`Sharding`] is the long-lived root of the router: it owns the global switch, the
//! shard registry, the binding cache and the default pool. Host integrations call
//! [`Sharding::resolve_pool`] before executing any statement and
//! [`Sharding::resolve_target`] when instantiating a record, so queries, new records
//! and re-fetched records all go through the same decision.

use crate::config::{Config, ShardCatalog};
use crate::db::{DbPool, ShardHandle, ShardRegistry, pool};
use crate::error::{ShardError, ShardResult};
use crate::models::{RecordType, ShardSpec, Target};
use crate::routing::binding::{BindingCache, ShardedBinding};
use crate::routing::context::ShardContext;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Root object of the shard router.
#[derive(Debug)]
pub struct Sharding {
    enabled: AtomicBool,
    registry: ShardRegistry,
    bindings: BindingCache,
    default_pool: DbPool,
}

impl Sharding {
    /// Create a router over an established default pool. Routing starts disabled.
    pub fn new(default_pool: DbPool, catalog: ShardCatalog) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            registry: ShardRegistry::new(catalog),
            bindings: BindingCache::new(),
            default_pool,
        }
    }

    /// Establish the default connection and build the catalog from configuration.
    pub async fn connect(config: &Config) -> ShardResult<Self> {
        let default_params = config.default_connection()?;
        let catalog = config.shard_catalog()?;
        let default_pool = pool::establish(&default_params).await?;

        let sharding = Self::new(default_pool, catalog);
        if config.enable {
            sharding.enable();
        }
        info!(
            shards = sharding.registry.catalog().len(),
            enabled = sharding.enabled(),
            "Shard router ready"
        );
        Ok(sharding)
    }

    /// Enable sharding for every type configured for it.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Disable sharding: every type routes to the default pool.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    pub fn bindings(&self) -> &BindingCache {
        &self.bindings
    }

    /// The unsharded connection pool.
    pub fn default_pool(&self) -> &DbPool {
        &self.default_pool
    }

    /// True when `record_type` is sharded and sharding is enabled.
    pub fn is_sharded(&self, record_type: &RecordType) -> bool {
        self.enabled() && record_type.sharding().is_sharded()
    }

    /// True when `record_type` shards its associations and sharding is enabled.
    pub fn shards_associated(&self, record_type: &RecordType) -> bool {
        self.enabled() && record_type.sharding().associates_sharded()
    }

    /// Resolve a descriptor to its shard handle.
    pub async fn resolve_handle(&self, spec: &ShardSpec) -> ShardResult<Arc<ShardHandle>> {
        self.registry.resolve(spec).await
    }

    /// Get or create the binding of `record_type` to `handle`.
    pub fn binding_for(
        &self,
        record_type: &Arc<RecordType>,
        handle: &Arc<ShardHandle>,
    ) -> Arc<ShardedBinding> {
        self.bindings.binding_for(record_type, handle)
    }

    /// Resolve the shard of a sharded type from the current context.
    ///
    /// Fails with `MissingShardContext` when the type's key is not in scope.
    pub async fn resolve_handle_for(
        &self,
        record_type: &RecordType,
    ) -> ShardResult<Arc<ShardHandle>> {
        let key = record_type.sharding().context_key().ok_or_else(|| {
            ShardError::configuration(format!("{} is not sharded", record_type.name()))
        })?;

        let spec = {
            let context = ShardContext::current();
            let selector = context
                .get(key)
                .ok_or_else(|| ShardError::missing_shard_context(key))?;
            selector.resolve()?
        };

        let handle = self.registry.resolve(&spec).await?;
        debug!(
            record_type = record_type.name(),
            context_key = key,
            shard = handle.name(),
            "Resolved shard from context"
        );
        Ok(handle)
    }

    /// Pin `target` to the shard it must use right now.
    ///
    /// While sharding is disabled every target falls back to its base type. Bound
    /// targets are otherwise returned as is; unsharded types stay on the base type;
    /// sharded types are bound to the shard selected by the current context.
    pub async fn resolve_target(&self, target: &Target) -> ShardResult<Target> {
        if !self.enabled() {
            return Ok(Target::Base(Arc::clone(target.record_type())));
        }
        match target {
            Target::Bound(_) => Ok(target.clone()),
            Target::Base(record_type) if !self.is_sharded(record_type) => Ok(target.clone()),
            Target::Base(record_type) => {
                let handle = self.resolve_handle_for(record_type).await?;
                Ok(Target::Bound(self.binding_for(record_type, &handle)))
            }
        }
    }

    /// The pool an operation on `target` must run on.
    pub async fn resolve_pool(&self, target: &Target) -> ShardResult<DbPool> {
        match self.resolve_target(target).await? {
            Target::Bound(binding) => Ok(binding.pool().clone()),
            Target::Base(_) => Ok(self.default_pool.clone()),
        }
    }

    /// Close the default pool and every shard pool.
    pub async fn close_all(&self) {
        self.registry.close_all().await;
        self.default_pool.close().await;
        info!("All connections closed");
    }
}
