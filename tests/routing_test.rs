//! Integration tests for connection resolution.
//!
//! Tests verify that:
//! - Sharded types route to the shard selected by the current context
//! - A missing context key fails closed
//! - The global switch short-circuits every sharded type to the default pool
//! - Deferred selectors and their failures
//! - Context isolation between concurrent tasks

use shard_router::config::{Config, ShardCatalog};
use shard_router::db::pool;
use shard_router::error::ShardError;
use shard_router::models::{ConnectionParams, RecordType, ShardSpec, Target};
use shard_router::routing::{Selector, Sharding, with_context};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    sharding: Arc<Sharding>,
}

fn sqlite(dir: &TempDir, file: &str) -> ConnectionParams {
    ConnectionParams::sqlite(dir.path().join(file).to_string_lossy())
}

/// Default database plus two named shards, routing enabled.
async fn setup() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut catalog = ShardCatalog::new();
    catalog.insert("shard1", sqlite(&dir, "one.db"));
    catalog.insert("shard2", sqlite(&dir, "two.db"));

    let default_pool = pool::establish(&sqlite(&dir, "default.db")).await.unwrap();
    let sharding = Sharding::new(default_pool, catalog);
    sharding.enable();

    Fixture {
        _dir: dir,
        sharding: Arc::new(sharding),
    }
}

fn widget() -> Arc<RecordType> {
    RecordType::builder("Widget").sharded_by("user").build().unwrap()
}

#[tokio::test]
async fn test_disabled_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let default_pool = pool::establish(&sqlite(&dir, "default.db")).await.unwrap();
    let sharding = Sharding::new(default_pool, ShardCatalog::new());
    assert!(!sharding.enabled());
}

#[tokio::test]
async fn test_sharded_type_uses_context_shard() {
    let fx = setup().await;
    let target = Target::from(widget());

    let pool = with_context([("user", "shard1")], fx.sharding.resolve_pool(&target))
        .await
        .unwrap();

    let shard1 = fx
        .sharding
        .resolve_handle(&ShardSpec::named("shard1"))
        .await
        .unwrap();
    assert!(pool.same_pool(shard1.pool()));
    assert!(!pool.same_pool(fx.sharding.default_pool()));
}

#[tokio::test]
async fn test_missing_context_fails_closed() {
    let fx = setup().await;
    let target = Target::from(widget());

    let err = fx.sharding.resolve_pool(&target).await.unwrap_err();
    assert!(matches!(err, ShardError::MissingShardContext { ref key } if key == "user"));
    assert_eq!(err.to_string(), "Missing 'user' shard context");

    // A different key in scope does not help
    let err = with_context([("account", "shard1")], fx.sharding.resolve_pool(&target))
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::MissingShardContext { .. }));
    assert_eq!(fx.sharding.registry().pools_established(), 0);
}

#[tokio::test]
async fn test_disabled_short_circuits() {
    let fx = setup().await;
    fx.sharding.disable();
    let target = Target::from(widget());

    let pool = with_context([("user", "shard1")], fx.sharding.resolve_pool(&target))
        .await
        .unwrap();
    assert!(pool.same_pool(fx.sharding.default_pool()));

    // No context needed either
    let pool = fx.sharding.resolve_pool(&target).await.unwrap();
    assert!(pool.same_pool(fx.sharding.default_pool()));
    assert_eq!(fx.sharding.registry().pools_established(), 0);
}

#[tokio::test]
async fn test_disabled_ignores_existing_bindings() {
    let fx = setup().await;
    let bound = with_context(
        [("user", "shard1")],
        fx.sharding.resolve_target(&Target::from(widget())),
    )
    .await
    .unwrap();

    fx.sharding.disable();
    let pool = fx.sharding.resolve_pool(&bound).await.unwrap();
    assert!(pool.same_pool(fx.sharding.default_pool()));

    fx.sharding.enable();
    let pool = fx.sharding.resolve_pool(&bound).await.unwrap();
    assert!(pool.same_pool(bound.binding().unwrap().pool()));
}

#[tokio::test]
async fn test_unsharded_type_uses_default_pool() {
    let fx = setup().await;
    let plain = Target::from(RecordType::unsharded("Plain").unwrap());

    let pool = with_context([("user", "shard1")], fx.sharding.resolve_pool(&plain))
        .await
        .unwrap();
    assert!(pool.same_pool(fx.sharding.default_pool()));
}

#[tokio::test]
async fn test_resolve_target_binds_and_bound_stays() {
    let fx = setup().await;
    let target = Target::from(widget());

    let bound = with_context([("user", "shard2")], fx.sharding.resolve_target(&target))
        .await
        .unwrap();
    assert_eq!(bound.name(), "Shard0::Widget");
    assert!(bound.is_bound());

    // A bound target keeps its shard regardless of the current context
    let again = with_context([("user", "shard1")], fx.sharding.resolve_target(&bound))
        .await
        .unwrap();
    assert_eq!(again, bound);

    // Same type and shard yield the same binding
    let twice = with_context([("user", "shard2")], fx.sharding.resolve_target(&target))
        .await
        .unwrap();
    let (Target::Bound(first), Target::Bound(second)) = (&bound, &twice) else {
        panic!("expected bound targets");
    };
    assert!(Arc::ptr_eq(first, second));
    assert_eq!(fx.sharding.bindings().len(), 1);
}

#[tokio::test]
async fn test_explicit_params_in_context() {
    let fx = setup().await;
    let dir = tempfile::tempdir().unwrap();
    let target = Target::from(widget());

    let pool = with_context(
        [("user", sqlite(&dir, "adhoc.db"))],
        fx.sharding.resolve_pool(&target),
    )
    .await
    .unwrap();

    let handles = fx.sharding.registry().handles().await;
    assert_eq!(handles.len(), 1);
    assert!(handles[0].catalog_name().is_none());
    assert!(pool.same_pool(handles[0].pool()));
}

#[tokio::test]
async fn test_deferred_selector_is_evaluated_per_resolution() {
    let fx = setup().await;
    let target = Target::from(widget());
    let current = Arc::new(std::sync::Mutex::new("shard1"));
    let selected = Arc::clone(&current);
    let selector = Selector::deferred(move || Ok(ShardSpec::named(*selected.lock().unwrap())));

    with_context([("user", selector)], async {
        let first = fx.sharding.resolve_target(&target).await.unwrap();
        *current.lock().unwrap() = "shard2";
        let second = fx.sharding.resolve_target(&target).await.unwrap();

        assert_eq!(first.binding().unwrap().handle().catalog_name(), Some("shard1"));
        assert_eq!(second.binding().unwrap().handle().catalog_name(), Some("shard2"));
    })
    .await;
}

#[tokio::test]
async fn test_selector_failure_propagates_unchanged() {
    let fx = setup().await;
    let target = Target::from(widget());
    let selector = Selector::deferred(|| {
        Err(ShardError::selector(std::io::Error::other("tenant lookup failed")))
    });

    let err = with_context([("user", selector)], fx.sharding.resolve_pool(&target))
        .await
        .unwrap_err();
    assert!(matches!(err, ShardError::Selector(_)));
    assert_eq!(err.to_string(), "tenant lookup failed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contexts_are_isolated_between_tasks() {
    let fx = setup().await;
    let target = Target::from(widget());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let sharding = Arc::clone(&fx.sharding);
            let target = target.clone();
            let shard = if i % 2 == 0 { "shard1" } else { "shard2" };
            tokio::spawn(with_context([("user", shard)], async move {
                tokio::task::yield_now().await;
                let bound = sharding.resolve_target(&target).await.unwrap();
                let catalog_name = bound
                    .binding()
                    .and_then(|binding| binding.handle().catalog_name().map(String::from));
                (shard, catalog_name)
            }))
        })
        .collect();

    for task in tasks {
        let (expected, actual) = task.await.unwrap();
        assert_eq!(actual.as_deref(), Some(expected));
    }
    assert_eq!(fx.sharding.registry().pools_established(), 2);
}

#[tokio::test]
async fn test_connect_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        database: Some(format!(
            "sqlite:{}?writable=true",
            dir.path().join("default.db").display()
        )),
        shards: vec![format!(
            "shard1=sqlite:{}?writable=true",
            dir.path().join("one.db").display()
        )],
        enable: true,
        ..Config::default_config()
    };

    let sharding = Sharding::connect(&config).await.unwrap();
    assert!(sharding.enabled());
    assert_eq!(sharding.registry().catalog().names(), vec!["shard1"]);

    let pool = with_context(
        [("user", "shard1")],
        sharding.resolve_pool(&Target::from(widget())),
    )
    .await
    .unwrap();
    assert!(!pool.same_pool(sharding.default_pool()));
    sharding.close_all().await;
}
