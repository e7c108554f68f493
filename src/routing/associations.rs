//! Association retargeting.
//!
//! Traversing an association from a sharded owner must return records bound to the
//! owner's shard rather than to the caller's ambient context. A descriptor is
//! rewritten when either:
//!
//! - the owner's type associates sharded and the target type is sharded; the shard
//!   comes from the owner's binding if it has one, otherwise from the owner's
//!   association selector
//! - the owner is itself bound and shares the target's context key; the association
//!   stays on the owner's shard
//!
//! Either condition alone is sufficient. Through associations are rewritten with the
//! same rule before the outer descriptor.

use crate::db::ShardHandle;
use crate::error::{ShardError, ShardResult};
use crate::models::{AssociationDescriptor, Record, Target};
use crate::routing::resolver::Sharding;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

impl Sharding {
    /// Rewrite `descriptor` for traversal from `owner`.
    ///
    /// Returns the original descriptor, borrowed, when nothing needs rewriting.
    pub async fn rewrite_association<'a>(
        &self,
        owner: &dyn Record,
        descriptor: &'a AssociationDescriptor,
    ) -> ShardResult<Cow<'a, AssociationDescriptor>> {
        if !self.enabled() {
            return Ok(Cow::Borrowed(descriptor));
        }

        let owner_target = owner.target();
        if !self.needs_rewrite(&owner_target, descriptor) {
            return Ok(Cow::Borrowed(descriptor));
        }

        let handle = self.association_handle(owner, &owner_target).await?;
        Ok(self.retarget(&owner_target, descriptor, &handle))
    }

    /// Whether the target of `descriptor` (ignoring through) is eligible.
    fn eligible(&self, owner: &Target, target: &Target) -> bool {
        // Already pinned
        let Target::Base(target_type) = target else {
            return false;
        };
        if !self.is_sharded(target_type) {
            return false;
        }

        let owner_type = owner.record_type();
        if self.shards_associated(owner_type) {
            return true;
        }

        owner.is_bound()
            && owner_type.sharding().context_key() == target_type.sharding().context_key()
    }

    fn needs_rewrite(&self, owner: &Target, descriptor: &AssociationDescriptor) -> bool {
        self.eligible(owner, &descriptor.target)
            || descriptor
                .through
                .as_deref()
                .is_some_and(|through| self.needs_rewrite(owner, through))
    }

    /// The shard associations of `owner` are pinned to.
    async fn association_handle(
        &self,
        owner: &dyn Record,
        owner_target: &Target,
    ) -> ShardResult<Arc<ShardHandle>> {
        if let Some(binding) = owner_target.binding() {
            return Ok(Arc::clone(binding.handle()));
        }

        let owner_type = owner_target.record_type();
        let accessor = owner_type.sharding().association_selector().ok_or_else(|| {
            ShardError::configuration(format!(
                "{} does not associate sharded",
                owner_type.name()
            ))
        })?;
        let spec = owner.association_shard(accessor)?;
        self.resolve_handle(&spec).await
    }

    fn retarget<'a>(
        &self,
        owner: &Target,
        descriptor: &'a AssociationDescriptor,
        handle: &Arc<ShardHandle>,
    ) -> Cow<'a, AssociationDescriptor> {
        let through = descriptor
            .through
            .as_deref()
            .map(|through| self.retarget(owner, through, handle));
        let through_changed = matches!(through, Some(Cow::Owned(_)));
        let eligible = self.eligible(owner, &descriptor.target);

        if !eligible && !through_changed {
            return Cow::Borrowed(descriptor);
        }

        let target = if eligible {
            let binding = self.binding_for(descriptor.target.record_type(), handle);
            debug!(
                association = %descriptor.name,
                owner = owner.name(),
                binding = binding.name(),
                "Retargeted association"
            );
            Target::Bound(binding)
        } else {
            descriptor.target.clone()
        };
        let through = through.map(|through| Box::new(through.into_owned()));

        Cow::Owned(descriptor.retargeted(target, through))
    }
}
