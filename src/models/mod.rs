//! Data models for the shard router.
//!
//! This module re-exports all model types used throughout the crate.

pub mod association;
pub mod connection;
pub mod record;

// Re-export commonly used types
pub use association::{AssociationDescriptor, AssociationKind};
pub use connection::{ConnectionParams, DatabaseType, ShardSpec};
pub use record::{
    Record, RecordType, RecordTypeBuilder, ShardOptions, ShardingConfig, Target,
};
