//! Error types for sqlshape

use thiserror::Error;

/// Result type alias for sqlshape operations
pub type ShapeResult<T> = Result<T, ShapeError>;

/// Error types for query construction and result shaping.
///
/// Every variant is fatal to the operation that produced it. Nothing is retried and
/// no partial results are returned.
#[derive(Debug, Error)]
pub enum ShapeError {
    /// Invalid construction or collaborator wiring
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// API called in a state where it cannot succeed
    #[error("Usage error: {0}")]
    Usage(String),

    /// Template engine failure (SQL rendering or predicate evaluation)
    #[error("Render error: {0}")]
    Render(String),

    /// Database driver failure, carrying the driver's message
    #[error("Driver error: {0}")]
    Driver(String),

    /// Driver value could not be converted into a row value
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// A transformation step failed
    #[error("Transform error: {0}")]
    Transform(String),
}

impl ShapeError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a usage error
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// Create a render error
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    /// Create a driver error
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a transform error
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform(message.into())
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if this is a usage error
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    /// Check if this is a render error
    pub fn is_render(&self) -> bool {
        matches!(self, Self::Render(_))
    }

    /// Check if this is a driver error
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for ShapeError {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db_err) => Self::Driver(format!("{}: {}", db_err.code().code(), db_err.message())),
            None => Self::Driver(err.to_string()),
        }
    }
}
