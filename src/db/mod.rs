//! Database layer.
//!
//! This module provides database access functionality:
//! - Pool establishment for a set of connection parameters
//! - The shard registry deduplicating descriptors into handles
//! - Routed record persistence
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod pool;
pub mod registry;
pub mod store;

pub use pool::DbPool;
pub use registry::{ShardHandle, ShardRegistry, ShardSummary};
pub use store::RecordStore;
