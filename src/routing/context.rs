//! Scoped shard context.
//!
//! The context maps context keys to shard selectors for the current logical task.
//! It is installed with [`with_context`] (async, follows the task across `.await`
//! points) or [`with_context_sync`], and is restored to its exact previous value when
//! the scope ends, whether the body returns, fails, panics or is cancelled.
//!
//! Spawned tasks start with an empty context.

use crate::error::ShardResult;
use crate::models::{ConnectionParams, ShardSpec};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static SHARD_CONTEXT: ShardContext;
}

type Resolver = dyn Fn() -> ShardResult<ShardSpec> + Send + Sync;

/// A value selecting a shard for a context key.
#[derive(Clone)]
pub enum Selector {
    Spec(ShardSpec),
    /// Invoked on every resolution that needs it; never cached.
    Deferred(Arc<Resolver>),
}

impl Selector {
    /// A selector computed at resolution time.
    pub fn deferred<F>(resolver: F) -> Self
    where
        F: Fn() -> ShardResult<ShardSpec> + Send + Sync + 'static,
    {
        Self::Deferred(Arc::new(resolver))
    }

    /// Produce the descriptor, invoking a deferred resolver once.
    pub fn resolve(&self) -> ShardResult<ShardSpec> {
        match self {
            Selector::Spec(spec) => Ok(spec.clone()),
            Selector::Deferred(resolver) => resolver(),
        }
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Spec(spec) => f.debug_tuple("Spec").field(spec).finish(),
            Selector::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Selector::Spec(a), Selector::Spec(b)) => a == b,
            (Selector::Deferred(a), Selector::Deferred(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<ShardSpec> for Selector {
    fn from(spec: ShardSpec) -> Self {
        Selector::Spec(spec)
    }
}

impl From<ConnectionParams> for Selector {
    fn from(params: ConnectionParams) -> Self {
        Selector::Spec(ShardSpec::Params(params))
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::Spec(ShardSpec::named(name))
    }
}

/// An immutable snapshot of context key to selector mappings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardContext {
    selectors: Arc<BTreeMap<String, Selector>>,
}

impl ShardContext {
    /// The context of the current task, or an empty one outside any scope.
    pub fn current() -> Self {
        SHARD_CONTEXT
            .try_with(|context| context.clone())
            .unwrap_or_default()
    }

    /// Selector for `key`. Absence is not an error by itself.
    pub fn get(&self, key: &str) -> Option<&Selector> {
        self.selectors.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.selectors.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.selectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    /// A copy of this context with `overrides` merged on top.
    fn merged<I, K, S>(&self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        K: Into<String>,
        S: Into<Selector>,
    {
        let mut selectors = (*self.selectors).clone();
        selectors.extend(
            overrides
                .into_iter()
                .map(|(key, selector)| (key.into(), selector.into())),
        );
        Self {
            selectors: Arc::new(selectors),
        }
    }
}

/// Run `body` with `overrides` merged into the current context.
///
/// Returns the body's output unchanged, including any `Err`.
pub async fn with_context<I, K, S, F>(overrides: I, body: F) -> F::Output
where
    I: IntoIterator<Item = (K, S)>,
    K: Into<String>,
    S: Into<Selector>,
    F: Future,
{
    let context = ShardContext::current().merged(overrides);
    SHARD_CONTEXT.scope(context, body).await
}

/// Synchronous variant of [`with_context`].
pub fn with_context_sync<I, K, S, F, R>(overrides: I, body: F) -> R
where
    I: IntoIterator<Item = (K, S)>,
    K: Into<String>,
    S: Into<Selector>,
    F: FnOnce() -> R,
{
    let context = ShardContext::current().merged(overrides);
    SHARD_CONTEXT.sync_scope(context, body)
}
