//! Shard routing.
//!
//! This module provides the routing decisions:
//! - Shard-pinned record type bindings
//! - Scoped, task-local shard context
//! - Connection resolution for record types and instances
//! - Association retargeting for sharded owners
//! - Uniqueness validation scoping

pub mod associations;
pub mod binding;
pub mod context;
pub mod resolver;
pub mod validation;

pub use binding::{BindingCache, ShardedBinding};
pub use context::{Selector, ShardContext, with_context, with_context_sync};
pub use resolver::Sharding;
