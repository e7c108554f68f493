//! Connection pool establishment.
//!
//! This module establishes database-specific pools (MySqlPool, PgPool, SqlitePool)
//! for a set of connection parameters. Pool internals (sizing, reconnection) stay
//! with sqlx; the router only decides which pool an operation runs on.

use crate::error::{ShardError, ShardResult};
use crate::models::{ConnectionParams, DatabaseType};
use sqlx::{
    MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    postgres::PgPoolOptions, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Check whether both values are clones of the same underlying pool.
    pub fn same_pool(&self, other: &DbPool) -> bool {
        match (self, other) {
            (DbPool::MySql(a), DbPool::MySql(b)) => {
                Arc::ptr_eq(&a.connect_options(), &b.connect_options())
            }
            (DbPool::Postgres(a), DbPool::Postgres(b)) => {
                Arc::ptr_eq(&a.connect_options(), &b.connect_options())
            }
            (DbPool::SQLite(a), DbPool::SQLite(b)) => {
                Arc::ptr_eq(&a.connect_options(), &b.connect_options())
            }
            _ => false,
        }
    }
}

/// Establish a connection pool for the given parameters.
///
/// Connects eagerly so an unreachable shard fails here, at first resolution,
/// rather than on the first query routed to it.
pub async fn establish(params: &ConnectionParams) -> ShardResult<DbPool> {
    let pool_opts = &params.pool;
    let is_sqlite = params.db_type == DatabaseType::SQLite;
    let acquire_timeout = pool_opts.acquire_timeout();
    let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));
    let url = params.connection_url();
    let fail = |e: sqlx::Error| {
        warn!(url = %params.masked_url(), error = %e, "Failed to establish pool");
        ShardError::connection_establishment(
            params.masked_url(),
            format!("{e} ({})", establishment_hint(params)),
        )
    };

    let pool = match params.db_type {
        DatabaseType::MySQL => {
            let options = MySqlConnectOptions::from_str(&url)
                .map_err(fail)?
                .charset("utf8mb4");

            let pool = MySqlPoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await
                .map_err(fail)?;
            DbPool::MySql(pool)
        }
        DatabaseType::PostgreSQL => {
            let pool = PgPoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect(&url)
                .await
                .map_err(fail)?;
            DbPool::Postgres(pool)
        }
        DatabaseType::SQLite => {
            let mut options = SqliteConnectOptions::from_str(&url).map_err(fail)?;

            if params.writable {
                options = options.create_if_missing(true).read_only(false);
            } else {
                options = options.read_only(true);
            }

            let pool = SqlitePoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await
                .map_err(fail)?;
            DbPool::SQLite(pool)
        }
    };

    info!(
        db_type = %params.db_type,
        url = %params.masked_url(),
        "Established connection pool"
    );
    Ok(pool)
}

/// Hint appended to establishment failures.
fn establishment_hint(params: &ConnectionParams) -> &'static str {
    match params.db_type {
        DatabaseType::SQLite if !params.writable => {
            "the file must already exist; add writable=true to create it"
        }
        DatabaseType::SQLite => "the parent directory must exist and be writable",
        DatabaseType::MySQL | DatabaseType::PostgreSQL => {
            "check that the server is reachable and the credentials are valid"
        }
    }
}
