//! Error types for pgmapper

use thiserror::Error;

/// Result type alias for mapper operations
pub type MapperResult<T> = Result<T, MapperError>;

/// Error types for mapper operations
#[derive(Debug, Error)]
pub enum MapperError {
    /// Connection parameters missing or unusable; raised before any query runs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Strict-mode violation: unknown column, missing WHERE on UPDATE/DELETE,
    /// empty predicate, or a primary-key operation on a table without one
    #[error("Validation error: {0}")]
    Validation(String),

    /// Placeholder/parameter count mismatch during formatting
    #[error("Parameter count mismatch: {placeholders} placeholder(s), {params} parameter(s)")]
    ParameterCount { placeholders: usize, params: usize },

    /// A relation name was looked up that was never registered on the table
    #[error("Unknown relation '{name}' on table '{table}'")]
    UnknownRelation { table: String, name: String },

    /// A facade was used before its schema was bound
    #[error("Table '{0}' has no schema bound; call bind() first")]
    Unbound(String),

    /// Any failure returned by the backend, propagated unchanged
    #[error("Driver error: {0}")]
    Driver(#[from] tokio_postgres::Error),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Row decode error (driver row to mapper row conversion)
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl MapperError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a parameter count error
    pub fn is_parameter_count(&self) -> bool {
        matches!(self, Self::ParameterCount { .. })
    }
}

impl From<deadpool_postgres::PoolError> for MapperError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
