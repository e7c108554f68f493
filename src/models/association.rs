//! Association descriptors.
//!
//! Descriptors may be shared and cached by the host, so the router never mutates
//! one in place; rewriting produces a new descriptor.

use crate::models::{RecordType, Target};
use serde::Serialize;
use std::sync::Arc;

/// Kind of relationship between the owner and the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    BelongsTo,
    HasOne,
    HasMany,
}

/// Metadata describing a relationship from an owner type to a target type.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationDescriptor {
    pub name: String,
    pub kind: AssociationKind,
    pub target: Target,
    /// Intermediate association this one is reached through.
    pub through: Option<Box<AssociationDescriptor>>,
}

impl AssociationDescriptor {
    pub fn new(name: impl Into<String>, kind: AssociationKind, target: Arc<RecordType>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: Target::Base(target),
            through: None,
        }
    }

    pub fn belongs_to(name: impl Into<String>, target: Arc<RecordType>) -> Self {
        Self::new(name, AssociationKind::BelongsTo, target)
    }

    pub fn has_one(name: impl Into<String>, target: Arc<RecordType>) -> Self {
        Self::new(name, AssociationKind::HasOne, target)
    }

    pub fn has_many(name: impl Into<String>, target: Arc<RecordType>) -> Self {
        Self::new(name, AssociationKind::HasMany, target)
    }

    /// Reach this association through an intermediate one.
    pub fn through(mut self, through: AssociationDescriptor) -> Self {
        self.through = Some(Box::new(through));
        self
    }

    /// Copy of this descriptor with a different target and through component.
    pub(crate) fn retargeted(
        &self,
        target: Target,
        through: Option<Box<AssociationDescriptor>>,
    ) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            target,
            through,
        }
    }
}
