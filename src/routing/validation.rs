//! Uniqueness validation scoping.

use crate::error::ShardResult;
use crate::models::{Record, Target};
use crate::routing::resolver::Sharding;

impl Sharding {
    /// The target uniqueness checks for `record` must query.
    ///
    /// A bound record already carries its shard. A record of a sharded type is
    /// scoped to the binding of the shard the current context selects, the same
    /// shard it will be persisted to. Anything else uses its base type.
    pub async fn scope_target_for(&self, record: &dyn Record) -> ShardResult<Target> {
        let target = record.target();
        match &target {
            Target::Bound(_) => Ok(target),
            Target::Base(record_type) if self.is_sharded(record_type) => {
                let handle = self.resolve_handle_for(record_type).await?;
                Ok(Target::Bound(self.binding_for(record_type, &handle)))
            }
            Target::Base(_) => Ok(target),
        }
    }
}
