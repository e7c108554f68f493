//! Shard Router Library
//!
//! Routes record types and instances to one of several database shards chosen at
//! runtime from a scoped, task-local context, on top of sqlx connection pools
//! (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routing;

pub use config::Config;
pub use db::{RecordStore, ShardHandle, ShardRegistry};
pub use error::{ShardError, ShardResult};
pub use models::{AssociationDescriptor, Record, RecordType, ShardSpec, Target};
pub use routing::{Sharding, with_context, with_context_sync};
