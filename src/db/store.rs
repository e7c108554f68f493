//! Routed record persistence.
//!
//! A thin persistence layer over the router, standing where an ORM would call into
//! it: every statement first asks [`Sharding`] for its pool, and uniqueness checks
//! run against [`Sharding::scope_target_for`], so a record is validated on exactly
//! the shard it is written to.

use crate::error::{ShardError, ShardResult};
use crate::models::{DatabaseType, Record, Target};
use crate::routing::Sharding;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Default statement timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Executes record statements on the pool the router selects.
#[derive(Debug, Clone)]
pub struct RecordStore {
    sharding: Arc<Sharding>,
    query_timeout: Duration,
}

impl RecordStore {
    pub fn new(sharding: Arc<Sharding>) -> Self {
        Self {
            sharding,
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Override the statement timeout.
    pub fn with_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn sharding(&self) -> &Arc<Sharding> {
        &self.sharding
    }

    /// Execute a statement without parameters (e.g. DDL) on `target`'s pool.
    pub async fn execute(&self, target: &Target, sql: &str) -> ShardResult<u64> {
        let pool = self.sharding.resolve_pool(target).await?;
        debug!(routed_to = target.name(), sql = %sql, "Executing statement");

        let result = impl_db_dispatch!(&pool, {
            MySql(p) => self.run(sqlx::query(sql).execute(p)).await?.rows_affected(),
            Postgres(p) => self.run(sqlx::query(sql).execute(p)).await?.rows_affected(),
            SQLite(p) => self.run(sqlx::query(sql).execute(p)).await?.rows_affected(),
        });
        Ok(result)
    }

    /// Count the rows of `target`'s table on its routed pool.
    pub async fn count(&self, target: &Target) -> ShardResult<i64> {
        let table = target.record_type().table();
        validate_identifier(table)?;
        let pool = self.sharding.resolve_pool(target).await?;
        let sql = format!("SELECT COUNT(*) FROM {table}");

        let count = impl_db_dispatch!(&pool, {
            MySql(p) => self.run(sqlx::query_scalar::<_, i64>(&sql).fetch_one(p)).await?,
            Postgres(p) => self.run(sqlx::query_scalar::<_, i64>(&sql).fetch_one(p)).await?,
            SQLite(p) => self.run(sqlx::query_scalar::<_, i64>(&sql).fetch_one(p)).await?,
        });
        Ok(count)
    }

    /// Check whether a row with `column = value` exists for `target`.
    pub async fn exists(&self, target: &Target, column: &str, value: &str) -> ShardResult<bool> {
        let table = target.record_type().table();
        validate_identifier(table)?;
        validate_identifier(column)?;
        let pool = self.sharding.resolve_pool(target).await?;
        let sql = format!(
            "SELECT 1 FROM {table} WHERE {column} = {} LIMIT 1",
            placeholder(pool.db_type(), 1)
        );

        let found = impl_db_dispatch!(&pool, {
            MySql(p) => self.run(sqlx::query(&sql).bind(value).fetch_optional(p)).await?.is_some(),
            Postgres(p) => self.run(sqlx::query(&sql).bind(value).fetch_optional(p)).await?.is_some(),
            SQLite(p) => self.run(sqlx::query(&sql).bind(value).fetch_optional(p)).await?.is_some(),
        });
        Ok(found)
    }

    /// Validate and insert `record`.
    ///
    /// The shard is resolved once: each column in `unique` is checked against the
    /// record's validation scope and the row is written through that same scope.
    /// Returns the target the row was written through.
    pub async fn create(
        &self,
        record: &dyn Record,
        attributes: &[(&str, &str)],
        unique: &[&str],
    ) -> ShardResult<Target> {
        // Already bound (or unsharded), so later routing never re-reads the context
        let target = self.sharding.scope_target_for(record).await?;
        for column in unique {
            let value = attributes
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| *value)
                .ok_or_else(|| {
                    ShardError::invalid_input(format!("No value for unique column '{column}'"))
                })?;
            if self.exists(&target, column, value).await? {
                return Err(ShardError::validation(*column, value));
            }
        }

        let pool = self.sharding.resolve_pool(&target).await?;
        let sql = insert_sql(pool.db_type(), target.record_type().table(), attributes)?;
        debug!(routed_to = target.name(), sql = %sql, "Inserting record");

        impl_db_dispatch!(&pool, {
            MySql(p) => {
                let mut query = sqlx::query(&sql);
                for (_, value) in attributes {
                    query = query.bind(*value);
                }
                self.run(query.execute(p)).await?;
            },
            Postgres(p) => {
                let mut query = sqlx::query(&sql);
                for (_, value) in attributes {
                    query = query.bind(*value);
                }
                self.run(query.execute(p)).await?;
            },
            SQLite(p) => {
                let mut query = sqlx::query(&sql);
                for (_, value) in attributes {
                    query = query.bind(*value);
                }
                self.run(query.execute(p)).await?;
            },
        });
        Ok(target)
    }

    /// Await a sqlx future under the statement timeout.
    async fn run<T>(
        &self,
        fut: impl Future<Output = Result<T, sqlx::Error>>,
    ) -> ShardResult<T> {
        match timeout(self.query_timeout, fut).await {
            Ok(result) => result.map_err(ShardError::from),
            Err(_) => Err(ShardError::database(
                format!(
                    "Statement exceeded {}s timeout",
                    self.query_timeout.as_secs()
                ),
                None,
            )),
        }
    }
}

/// Bind placeholder for the `n`-th parameter (1-based).
fn placeholder(db_type: DatabaseType, n: usize) -> String {
    match db_type {
        DatabaseType::PostgreSQL => format!("${n}"),
        DatabaseType::MySQL | DatabaseType::SQLite => "?".to_string(),
    }
}

fn insert_sql(db_type: DatabaseType, table: &str, attributes: &[(&str, &str)]) -> ShardResult<String> {
    validate_identifier(table)?;
    if attributes.is_empty() {
        return Err(ShardError::invalid_input("Cannot insert a record without attributes"));
    }
    let mut columns = Vec::with_capacity(attributes.len());
    let mut values = Vec::with_capacity(attributes.len());
    for (i, (column, _)) in attributes.iter().enumerate() {
        validate_identifier(column)?;
        columns.push(*column);
        values.push(placeholder(db_type, i + 1));
    }
    Ok(format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        values.join(", ")
    ))
}

/// Only plain identifiers are interpolated into SQL.
fn validate_identifier(name: &str) -> ShardResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ShardError::invalid_input(format!("Invalid identifier: {name:?}")))
    }
}
