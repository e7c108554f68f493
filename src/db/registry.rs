//! Shard registry: deduplicates connection descriptors into shard handles.
//!
//! # Design Decisions
//!
//! - **Keyed by resolved parameters**: a named reference and the explicit parameters
//!   it points at share one handle
//! - **`OnceCell` per key**: single-flight pool establishment, so concurrent first calls
//!   with the same descriptor establish exactly one pool
//! - **Ids allocated on success**: a failed establishment leaves the cell empty and
//!   consumes no id, so the next call retries from scratch
//! - **No eviction**: shard topology is stable for the process lifetime; pools are only
//!   closed by [`ShardRegistry::close_all`] at shutdown

use crate::config::ShardCatalog;
use crate::db::pool::{self, DbPool};
use crate::error::ShardResult;
use crate::models::{ConnectionParams, DatabaseType, ShardSpec};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OnceCell, RwLock as TokioRwLock};
use tracing::{debug, info};

/// The resolved, cached identity of one shard.
#[derive(Debug)]
pub struct ShardHandle {
    id: usize,
    name: String,
    params: ConnectionParams,
    /// Catalog name of the descriptor this handle was first resolved from.
    catalog_name: Option<String>,
    pool: DbPool,
}

impl ShardHandle {
    /// Sequential id, starting at 0 in first-established order.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Generated name, e.g. "Shard0".
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The resolved connection parameters this shard was established from.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// A descriptor equal to the one this handle was cached under.
    pub fn spec(&self) -> ShardSpec {
        ShardSpec::Params(self.params.clone())
    }

    pub fn catalog_name(&self) -> Option<&str> {
        self.catalog_name.as_deref()
    }

    /// The pool every operation routed to this shard runs on.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Summary safe to log or print (no secrets).
    pub fn summary(&self) -> ShardSummary {
        ShardSummary {
            id: self.id,
            name: self.name.clone(),
            catalog_name: self.catalog_name.clone(),
            db_type: self.params.db_type,
            url: self.params.masked_url(),
        }
    }
}

/// Shard information for listings (password masked).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ShardSummary {
    pub id: usize,
    /// Generated shard name, e.g. "Shard0".
    pub name: String,
    /// Catalog entry the shard was first resolved through, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_name: Option<String>,
    pub db_type: DatabaseType,
    pub url: String,
}

/// Process-wide registry of shard handles.
pub struct ShardRegistry {
    catalog: ShardCatalog,
    /// Per-descriptor lazy handles. OnceCell ensures single-flight creation.
    shards: TokioRwLock<HashMap<ConnectionParams, Arc<OnceCell<Arc<ShardHandle>>>>>,
    /// Next shard id; also the number of pools established so far.
    next_id: AtomicUsize,
}

impl ShardRegistry {
    /// Create an empty registry resolving named descriptors through `catalog`.
    pub fn new(catalog: ShardCatalog) -> Self {
        Self {
            catalog,
            shards: TokioRwLock::new(HashMap::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn catalog(&self) -> &ShardCatalog {
        &self.catalog
    }

    /// Resolve a descriptor to its shard handle, establishing the pool on first use.
    ///
    /// Concurrent requests for the same descriptor wait for the first to complete.
    /// A failed establishment is not cached.
    pub async fn resolve(&self, spec: &ShardSpec) -> ShardResult<Arc<ShardHandle>> {
        let (params, catalog_name) = self.catalog.resolve(spec)?;

        // Get or create the OnceCell for these parameters
        let cell = {
            let shards = self.shards.read().await;
            if let Some(cell) = shards.get(&params) {
                Arc::clone(cell)
            } else {
                drop(shards);
                let mut shards = self.shards.write().await;
                // Double-check after acquiring write lock
                if let Some(cell) = shards.get(&params) {
                    Arc::clone(cell)
                } else {
                    let cell = Arc::new(OnceCell::new());
                    shards.insert(params.clone(), Arc::clone(&cell));
                    cell
                }
            }
        };

        let result = cell
            .get_or_try_init(|| async {
                let pool = pool::establish(&params).await?;
                let id = self.next_id.fetch_add(1, Ordering::AcqRel);
                let handle = ShardHandle {
                    id,
                    name: format!("Shard{id}"),
                    params: params.clone(),
                    catalog_name: catalog_name.clone(),
                    pool,
                };
                info!(
                    shard = %handle.name,
                    shard_id = id,
                    catalog_name = ?handle.catalog_name,
                    url = %handle.params.masked_url(),
                    "Registered shard"
                );
                Ok::<_, crate::error::ShardError>(Arc::new(handle))
            })
            .await;
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                self.discard_failed(&params, &cell).await;
                return Err(e);
            }
        };

        debug!(shard = %handle.name, "Resolved shard handle");
        Ok(Arc::clone(handle))
    }

    /// Drop the empty cell of a failed establishment so failures do not accumulate.
    ///
    /// A cell another caller still holds is left alone: that caller may be retrying
    /// on it and its handle must stay reachable through the map.
    async fn discard_failed(
        &self,
        params: &ConnectionParams,
        cell: &Arc<OnceCell<Arc<ShardHandle>>>,
    ) {
        let mut shards = self.shards.write().await;
        let removable = shards.get(params).is_some_and(|current| {
            Arc::ptr_eq(current, cell) && !current.initialized() && Arc::strong_count(cell) == 2
        });
        if removable {
            shards.remove(params);
            debug!(url = %params.masked_url(), "Discarded failed shard entry");
        }
    }

    /// Look up an established shard by its generated name.
    pub async fn get(&self, name: &str) -> Option<Arc<ShardHandle>> {
        let shards = self.shards.read().await;
        shards
            .values()
            .filter_map(|cell| cell.get())
            .find(|handle| handle.name == name)
            .cloned()
    }

    /// All established handles, ordered by id.
    pub async fn handles(&self) -> Vec<Arc<ShardHandle>> {
        let shards = self.shards.read().await;
        let mut handles: Vec<Arc<ShardHandle>> = shards
            .values()
            .filter_map(|cell| cell.get().cloned())
            .collect();
        handles.sort_by_key(|handle| handle.id);
        handles
    }

    /// Number of established shards.
    pub async fn len(&self) -> usize {
        let shards = self.shards.read().await;
        shards.values().filter(|cell| cell.get().is_some()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total number of pools this registry has established.
    pub fn pools_established(&self) -> usize {
        self.next_id.load(Ordering::Acquire)
    }

    /// Close every shard pool. Handles stay cached; their pools reject new work.
    pub async fn close_all(&self) {
        for handle in self.handles().await {
            info!(shard = %handle.name, "Closing shard pool");
            handle.pool.close().await;
        }
    }
}

impl std::fmt::Debug for ShardRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRegistry")
            .field("catalog", &self.catalog.names())
            .field("pools_established", &self.pools_established())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShardError;

    fn sqlite_params(dir: &tempfile::TempDir, file: &str) -> ConnectionParams {
        ConnectionParams::sqlite(dir.path().join(file).to_string_lossy())
    }

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = ShardRegistry::new(ShardCatalog::new());
        assert!(registry.is_empty().await);
        assert_eq!(registry.pools_established(), 0);
    }

    #[tokio::test]
    async fn test_resolve_caches_handle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ShardRegistry::new(ShardCatalog::new());
        let spec = ShardSpec::from(sqlite_params(&dir, "a.db"));

        let first = registry.resolve(&spec).await.unwrap();
        let second = registry.resolve(&spec).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.id(), 0);
        assert_eq!(first.name(), "Shard0");
        assert_eq!(registry.pools_established(), 1);
    }

    #[tokio::test]
    async fn test_named_and_explicit_share_handle() {
        let dir = tempfile::tempdir().unwrap();
        let params = sqlite_params(&dir, "a.db");
        let mut catalog = ShardCatalog::new();
        catalog.insert("shard1", params.clone());
        let registry = ShardRegistry::new(catalog);

        let named = registry.resolve(&ShardSpec::named("shard1")).await.unwrap();
        let explicit = registry.resolve(&ShardSpec::from(params)).await.unwrap();
        assert!(Arc::ptr_eq(&named, &explicit));
        assert_eq!(named.catalog_name(), Some("shard1"));
        assert_eq!(registry.get("Shard0").await.map(|h| h.id()), Some(0));
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_cached() {
        let registry = ShardRegistry::new(ShardCatalog::new());
        let result = registry.resolve(&ShardSpec::named("nope")).await;
        assert!(matches!(
            result,
            Err(ShardError::ConnectionEstablishment { .. })
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_handle_summary() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ShardRegistry::new(ShardCatalog::new());
        let handle = registry
            .resolve(&ShardSpec::from(sqlite_params(&dir, "a.db")))
            .await
            .unwrap();
        let summary = handle.summary();
        assert_eq!(summary.name, "Shard0");
        assert_eq!(summary.db_type, DatabaseType::SQLite);
        assert!(summary.url.ends_with("a.db"));
    }

    #[tokio::test]
    async fn test_failed_establishment_leaves_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ShardRegistry::new(ShardCatalog::new());

        for i in 0..3 {
            let mut params = sqlite_params(&dir, &format!("missing/{i}.db"));
            params.writable = false;
            let result = registry.resolve(&ShardSpec::from(params)).await;
            assert!(matches!(
                result,
                Err(ShardError::ConnectionEstablishment { .. })
            ));
        }

        assert!(registry.shards.read().await.is_empty());
        assert_eq!(registry.pools_established(), 0);
    }
}
