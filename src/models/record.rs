//! Record types and their sharding configuration.
//!
//! A [`RecordType`] is defined once, at startup, from declarative options and is
//! immutable afterwards. Records reference their type through a [`Target`], which is
//! either the plain type or a shard-pinned binding of it.

use crate::error::{ShardError, ShardResult};
use crate::models::ShardSpec;
use crate::routing::ShardedBinding;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Declarative sharding options as written in a type definition.
///
/// ```text
/// { "by": "user" }                            sharded by the "user" context key
/// { "associated": true, "using": "shard" }    associations follow the owner's "shard" accessor
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardOptions {
    /// Context key the type is sharded by.
    #[serde(default)]
    pub by: Option<String>,
    /// Route sharded associations through the owner's selector.
    #[serde(default)]
    pub associated: bool,
    /// Owner accessor returning the association shard.
    #[serde(default)]
    pub using: Option<String>,
}

impl ShardOptions {
    /// Options for a type sharded by `key`.
    pub fn by(key: impl Into<String>) -> Self {
        Self {
            by: Some(key.into()),
            ..Self::default()
        }
    }

    /// Options for a type whose associations are sharded through `selector`.
    pub fn associated_using(selector: impl Into<String>) -> Self {
        Self {
            associated: true,
            using: Some(selector.into()),
            ..Self::default()
        }
    }
}

/// Per-type sharding configuration, fixed at definition time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardingConfig {
    context_key: Option<String>,
    association_selector: Option<String>,
}

impl ShardingConfig {
    /// Validate declarative options into a configuration.
    pub fn from_options(options: &ShardOptions) -> ShardResult<Self> {
        let mut config = Self::default();
        config.apply(options)?;
        Ok(config)
    }

    fn apply(&mut self, options: &ShardOptions) -> ShardResult<()> {
        if options.associated {
            let selector = non_empty(options.using.as_deref()).ok_or_else(|| {
                ShardError::configuration("associated sharding requires a 'using' accessor")
            })?;
            self.association_selector = Some(selector.to_string());
            if let Some(key) = options.by.as_deref() {
                self.set_context_key(key)?;
            }
        } else {
            if options.using.is_some() {
                return Err(ShardError::configuration(
                    "'using' is only valid together with 'associated'",
                ));
            }
            let key = options.by.as_deref().ok_or_else(|| {
                ShardError::configuration("sharded types require a 'by' context key")
            })?;
            self.set_context_key(key)?;
        }
        Ok(())
    }

    fn set_context_key(&mut self, key: &str) -> ShardResult<()> {
        let key = non_empty(Some(key))
            .ok_or_else(|| ShardError::configuration("shard context key cannot be empty"))?;
        self.context_key = Some(key.to_string());
        Ok(())
    }

    pub fn is_sharded(&self) -> bool {
        self.context_key.is_some()
    }

    pub fn context_key(&self) -> Option<&str> {
        self.context_key.as_deref()
    }

    pub fn associates_sharded(&self) -> bool {
        self.association_selector.is_some()
    }

    pub fn association_selector(&self) -> Option<&str> {
        self.association_selector.as_deref()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A logical record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    name: String,
    table: String,
    sharding: ShardingConfig,
}

impl RecordType {
    /// Start defining a record type.
    pub fn builder(name: impl Into<String>) -> RecordTypeBuilder {
        RecordTypeBuilder::new(name.into())
    }

    /// Define a type from a list of declarative option blocks.
    pub fn define(
        name: impl Into<String>,
        options: &[ShardOptions],
    ) -> ShardResult<Arc<RecordType>> {
        options
            .iter()
            .fold(Self::builder(name), |builder, opts| builder.shard(opts.clone()))
            .build()
    }

    /// A type that is never sharded.
    pub fn unsharded(name: impl Into<String>) -> ShardResult<Arc<RecordType>> {
        Self::builder(name).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn sharding(&self) -> &ShardingConfig {
        &self.sharding
    }
}

/// Builder for [`RecordType`]. Option errors are reported by [`build`](Self::build).
#[derive(Debug)]
pub struct RecordTypeBuilder {
    name: String,
    table: Option<String>,
    sharding: ShardingConfig,
    error: Option<ShardError>,
}

impl RecordTypeBuilder {
    fn new(name: String) -> Self {
        Self {
            name,
            table: None,
            sharding: ShardingConfig::default(),
            error: None,
        }
    }

    /// Override the table name (default: snake_case plural of the type name).
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Apply a declarative option block.
    pub fn shard(mut self, options: ShardOptions) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.sharding.apply(&options) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Shard this type by `context_key`.
    pub fn sharded_by(self, context_key: impl Into<String>) -> Self {
        self.shard(ShardOptions::by(context_key))
    }

    /// Route sharded associations through the owner accessor `selector`.
    pub fn associates_sharded(self, selector: impl Into<String>) -> Self {
        self.shard(ShardOptions::associated_using(selector))
    }

    pub fn build(self) -> ShardResult<Arc<RecordType>> {
        if let Some(e) = self.error {
            return Err(ShardError::configuration(format!(
                "{}: {}",
                self.name,
                match e {
                    ShardError::Configuration { message } => message,
                    other => other.to_string(),
                }
            )));
        }
        if self.name.trim().is_empty() {
            return Err(ShardError::configuration("record type name cannot be empty"));
        }
        let table = self.table.unwrap_or_else(|| default_table_name(&self.name));
        Ok(Arc::new(RecordType {
            name: self.name,
            table,
            sharding: self.sharding,
        }))
    }
}

/// "ShardedHasMany" -> "sharded_has_manys"
fn default_table_name(name: &str) -> String {
    let mut table = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                table.push('_');
            }
            table.extend(c.to_lowercase());
        } else {
            table.push(c);
        }
    }
    table.push('s');
    table
}

/// The type a record or association is routed through.
#[derive(Debug, Clone)]
pub enum Target {
    /// The logical type, routed by context (or the default connection).
    Base(Arc<RecordType>),
    /// A shard-pinned binding of the logical type.
    Bound(Arc<ShardedBinding>),
}

impl Target {
    /// The logical record type, with any shard binding stripped.
    pub fn record_type(&self) -> &Arc<RecordType> {
        match self {
            Target::Base(record_type) => record_type,
            Target::Bound(binding) => binding.record_type(),
        }
    }

    pub fn binding(&self) -> Option<&Arc<ShardedBinding>> {
        match self {
            Target::Base(_) => None,
            Target::Bound(binding) => Some(binding),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Target::Bound(_))
    }

    /// Type name, e.g. "Widget" or "Shard0::Widget".
    pub fn name(&self) -> &str {
        match self {
            Target::Base(record_type) => record_type.name(),
            Target::Bound(binding) => binding.name(),
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Target::Base(a), Target::Base(b)) => Arc::ptr_eq(a, b) || a == b,
            (Target::Bound(a), Target::Bound(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<Arc<RecordType>> for Target {
    fn from(record_type: Arc<RecordType>) -> Self {
        Target::Base(record_type)
    }
}

impl From<Arc<ShardedBinding>> for Target {
    fn from(binding: Arc<ShardedBinding>) -> Self {
        Target::Bound(binding)
    }
}

/// A record instance as seen by the router.
///
/// Host integrations implement this for their model values.
pub trait Record: Send + Sync {
    /// The routing target of this instance.
    fn target(&self) -> Target;

    /// Owner-supplied association selector: return the shard for `accessor`.
    ///
    /// Called when the owner's type associates sharded and the router needs the
    /// shard for a sharded association target. Errors propagate to the caller.
    fn association_shard(&self, accessor: &str) -> ShardResult<ShardSpec> {
        Err(ShardError::unknown_accessor(self.target().name(), accessor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharded_by_sets_context_key() {
        let record_type = RecordType::builder("Widget").sharded_by("user").build().unwrap();
        assert!(record_type.sharding().is_sharded());
        assert_eq!(record_type.sharding().context_key(), Some("user"));
        assert!(!record_type.sharding().associates_sharded());
    }

    #[test]
    fn test_associates_sharded_sets_selector() {
        let record_type = RecordType::builder("Company")
            .associates_sharded("shard_dsn")
            .build()
            .unwrap();
        assert!(!record_type.sharding().is_sharded());
        assert_eq!(record_type.sharding().association_selector(), Some("shard_dsn"));
    }

    #[test]
    fn test_associated_without_using_is_error() {
        let options = ShardOptions {
            associated: true,
            ..Default::default()
        };
        let result = RecordType::define("Owner", &[options]);
        assert!(matches!(result, Err(ShardError::Configuration { .. })));
    }

    #[test]
    fn test_shard_without_by_is_error() {
        let result = RecordType::define("Widget", &[ShardOptions::default()]);
        assert!(matches!(result, Err(ShardError::Configuration { .. })));
    }

    #[test]
    fn test_empty_keys_are_errors() {
        assert!(RecordType::builder("Widget").sharded_by("").build().is_err());
        assert!(RecordType::builder("Owner").associates_sharded("  ").build().is_err());
    }

    #[test]
    fn test_using_without_associated_is_error() {
        let options = ShardOptions {
            by: Some("user".to_string()),
            using: Some("shard".to_string()),
            ..Default::default()
        };
        assert!(RecordType::define("Widget", &[options]).is_err());
    }

    #[test]
    fn test_error_names_the_type() {
        let err = RecordType::builder("Widget").sharded_by("").build().unwrap_err();
        assert!(err.to_string().contains("Widget"));
    }

    #[test]
    fn test_options_deserialize() {
        let options: ShardOptions =
            serde_json::from_str(r#"{"associated": true, "using": "shard"}"#).unwrap();
        assert_eq!(options, ShardOptions::associated_using("shard"));

        let unknown = serde_json::from_str::<ShardOptions>(r#"{"without_using_by": true}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn test_both_declarations_combine() {
        let record_type = RecordType::define(
            "Customer",
            &[ShardOptions::by("company"), ShardOptions::associated_using("shard")],
        )
        .unwrap();
        assert!(record_type.sharding().is_sharded());
        assert!(record_type.sharding().associates_sharded());
    }

    #[test]
    fn test_default_table_name() {
        assert_eq!(default_table_name("ShardedHasMany"), "sharded_has_manys");
        assert_eq!(default_table_name("Widget"), "widgets");
        let record_type = RecordType::builder("Widget").table("gadgets").build().unwrap();
        assert_eq!(record_type.table(), "gadgets");
    }

    #[test]
    fn test_base_targets_compare_by_type() {
        let widget = RecordType::unsharded("Widget").unwrap();
        let other = RecordType::unsharded("Other").unwrap();
        assert_eq!(Target::from(widget.clone()), Target::from(widget.clone()));
        assert_ne!(Target::from(widget), Target::from(other));
    }
}
