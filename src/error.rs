//! Error types for the shard router.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every error is surfaced synchronously to the caller of the operation that triggered
//! resolution; nothing is swallowed inside the router.

use thiserror::Error;

/// Boxed error produced by application-supplied selectors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Missing '{key}' shard context")]
    MissingShardContext { key: String },

    #[error("Failed to establish connection for {spec}: {cause}")]
    ConnectionEstablishment { spec: String, cause: String },

    /// Failure raised by an owner selector or a deferred context resolver.
    #[error(transparent)]
    Selector(BoxError),

    #[error("Record type '{record_type}' has no shard accessor '{accessor}'")]
    UnknownAccessor {
        record_type: String,
        accessor: String,
    },

    #[error("Validation failed: {column} '{value}' has already been taken")]
    Validation { column: String, value: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl ShardError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a missing shard context error.
    pub fn missing_shard_context(key: impl Into<String>) -> Self {
        Self::MissingShardContext { key: key.into() }
    }

    /// Create a connection establishment error. `spec` must already be masked.
    pub fn connection_establishment(spec: impl Into<String>, cause: impl ToString) -> Self {
        Self::ConnectionEstablishment {
            spec: spec.into(),
            cause: cause.to_string(),
        }
    }

    /// Wrap an application error raised by a selector.
    pub fn selector(err: impl Into<BoxError>) -> Self {
        Self::Selector(err.into())
    }

    /// Create an unknown accessor error.
    pub fn unknown_accessor(record_type: impl Into<String>, accessor: impl Into<String>) -> Self {
        Self::UnknownAccessor {
            record_type: record_type.into(),
            accessor: accessor.into(),
        }
    }

    /// Create a uniqueness validation error.
    pub fn validation(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Validation {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Get an actionable hint for this error, if there is one.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::MissingShardContext { .. } => {
                Some("Wrap the operation in with_context and supply a selector for this key")
            }
            Self::ConnectionEstablishment { .. } => {
                Some("Check the shard connection parameters and that the server is reachable")
            }
            Self::Configuration { .. } => {
                Some("Sharded types need 'by'; associated sharding needs 'using'")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Failed establishments are never cached, so a later call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionEstablishment { .. })
    }
}

/// Convert sqlx errors to ShardError.
impl From<sqlx::Error> for ShardError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                ShardError::database(db_err.message(), code)
            }
            sqlx::Error::RowNotFound => ShardError::database("No rows returned", None),
            sqlx::Error::PoolTimedOut => {
                ShardError::database("Timed out acquiring a connection from the pool", None)
            }
            sqlx::Error::PoolClosed => ShardError::database("Connection pool is closed", None),
            other => ShardError::database(other.to_string(), None),
        }
    }
}

/// Result type alias for shard routing operations.
pub type ShardResult<T> = Result<T, ShardError>;
