//! Database error types

use rust_decimal::Decimal;
use tessera_types::ErrorClass;
use thiserror::Error;

/// Database operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Insufficient remaining on deposit {deposit_id}: available {available}, requested {requested}")]
    InsufficientRemaining {
        deposit_id: i64,
        available: Decimal,
        requested: Decimal,
    },
}

impl DbError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connection(_) | Self::Query(_) => ErrorClass::Transient,
            Self::Migration(_) => ErrorClass::FatalConfig,
            Self::NotFound(_) | Self::InvalidInput(_) | Self::Serialization(_) => {
                ErrorClass::Validation
            }
            Self::Duplicate(_) => ErrorClass::Conflict,
            Self::InsufficientRemaining { .. } => ErrorClass::Business,
        }
    }

    /// True for a unique-constraint violation reported by PostgreSQL
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Query(sqlx::Error::Database(e)) => e.is_unique_violation(),
            Self::Duplicate(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<tessera_types::TypesError> for DbError {
    fn from(e: tessera_types::TypesError) -> Self {
        DbError::Serialization(e.to_string())
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;
