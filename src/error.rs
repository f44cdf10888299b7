//! Error types for the entity store.
//!
//! All failure modes are defined here using `thiserror`. Every error
//! propagates synchronously to the caller of the triggering operation;
//! the driver never retries, swallows, or logs-and-ignores a failure.

use thiserror::Error;

/// SQLSTATE code for a uniqueness violation.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "No connection source: set DATABASE_URL or pass a URL, a credentials mapping, or an open connection"
    )]
    NoConnectionSource,

    #[error("Invalid connection configuration: {message}")]
    Configuration { message: String },

    #[error("{in_use} connections in use, cannot allocate more (max_connections = {max})")]
    PoolExhausted { in_use: usize, max: usize },

    #[error("Unsupported column type {pg_type} for attribute {attribute} on {entity}")]
    UnsupportedColumnType {
        pg_type: String,
        attribute: String,
        entity: String,
    },

    #[error("Unexpected null in non-nullable column {column} of {table}")]
    UnexpectedNull { column: String, table: String },

    #[error("Unknown column {column} in table {table}")]
    UnknownColumn { column: String, table: String },

    #[error("Unknown table {table}")]
    UnknownTable { table: String },

    #[error("Cannot insert record {key}: {message}")]
    CannotInsert { key: String, message: String },

    #[error("Cannot update record {key} in {table}: no such record")]
    CannotUpdate { key: String, table: String },

    #[error("Cannot delete record {key} from {table}: no such record")]
    CannotDelete { key: String, table: String },

    #[error("Invalid attributes for {entity}: {message}")]
    Validation { entity: String, message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for a uniqueness violation
        sql_state: Option<String>,
    },
}

impl StoreError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unsupported column type error.
    pub fn unsupported_column_type(
        pg_type: impl Into<String>,
        attribute: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        Self::UnsupportedColumnType {
            pg_type: pg_type.into(),
            attribute: attribute.into(),
            entity: entity.into(),
        }
    }

    /// Create an unexpected null error.
    pub fn unexpected_null(column: impl Into<String>, table: impl Into<String>) -> Self {
        Self::UnexpectedNull {
            column: column.into(),
            table: table.into(),
        }
    }

    /// Create an unknown column error.
    pub fn unknown_column(column: impl Into<String>, table: impl Into<String>) -> Self {
        Self::UnknownColumn {
            column: column.into(),
            table: table.into(),
        }
    }

    /// Create an unknown table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Create a cannot-insert error.
    pub fn cannot_insert(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CannotInsert {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a cannot-update error.
    pub fn cannot_update(key: impl Into<String>, table: impl Into<String>) -> Self {
        Self::CannotUpdate {
            key: key.into(),
            table: table.into(),
        }
    }

    /// Create a cannot-delete error.
    pub fn cannot_delete(key: impl Into<String>, table: impl Into<String>) -> Self {
        Self::CannotDelete {
            key: key.into(),
            table: table.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(message: impl Into<String>, sql_state: Option<String>) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
        }
    }

    /// Whether this is an engine uniqueness violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Database {
                sql_state: Some(code),
                ..
            } if code == UNIQUE_VIOLATION
        )
    }
}

/// Convert sqlx errors to StoreError.
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => StoreError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                StoreError::database(db_err.message(), code)
            }
            sqlx::Error::ColumnNotFound(col) => {
                StoreError::database(format!("Column not found: {}", col), None)
            }
            other => StoreError::database(other.to_string(), None),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhausted_display_names_counts() {
        let err = StoreError::PoolExhausted { in_use: 5, max: 5 };
        let msg = err.to_string();
        assert!(msg.contains("5 connections in use"));
        assert!(msg.contains("max_connections = 5"));
    }

    #[test]
    fn test_unsupported_column_type_display() {
        let err = StoreError::unsupported_column_type("money", "balance", "Account");
        assert_eq!(
            err.to_string(),
            "Unsupported column type money for attribute balance on Account"
        );
    }

    #[test]
    fn test_unique_violation_detection() {
        let err = StoreError::database("duplicate key", Some("23505".to_string()));
        assert!(err.is_unique_violation());

        let err = StoreError::database("syntax error", Some("42601".to_string()));
        assert!(!err.is_unique_violation());

        let err = StoreError::database("no state", None);
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn test_cannot_insert_carries_key_and_message() {
        let err = StoreError::cannot_insert("42", "duplicate key value");
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("duplicate key value"));
    }
}
