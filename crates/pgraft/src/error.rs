//! Error types for pgraft

use crate::violation::{Violation, ViolationCode, Violations};
use thiserror::Error;

/// Result type alias for pgraft operations
pub type GraftResult<T> = Result<T, GraftError>;

/// Error types for graph insertion
#[derive(Debug, Error)]
pub enum GraftError {
    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Malformed graph literal (wrong JSON shape, missing input)
    #[error("Invalid graph literal: {0}")]
    Input(String),

    /// Dangling, ambiguous, conflicting, or cyclic `#id` / `#ref` usage
    #[error("Reference error: {0}")]
    Resolution(String),

    /// One entity failed schema validation; nothing was written
    #[error("Validation error on '{table}': {violations}")]
    Validation { table: String, violations: Violations },

    /// A relation path outside the allowed-relations expression
    #[error("Unallowed relation: {0}")]
    UnallowedRelation(String),

    /// Malformed allowed-relations expression
    #[error("Invalid relation expression: {0}")]
    Expression(String),

    /// Table name not present in the schema registry
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Relation name not declared on the table
    #[error("Unknown relation '{relation}' on table '{table}'")]
    UnknownRelation { table: String, relation: String },

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Backend-agnostic storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl GraftError {
    /// Create an invalid-input error
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// Create a reference resolution error
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    /// Create a validation error for a table
    pub fn validation(table: impl Into<String>, violations: Violations) -> Self {
        Self::Validation {
            table: table.into(),
            violations,
        }
    }

    /// Create a validation error carrying a single violation
    pub fn violation(
        table: impl Into<String>,
        field: impl Into<String>,
        code: ViolationCode,
        message: impl Into<String>,
    ) -> Self {
        let mut violations = Violations::default();
        violations.push(Violation::new(field, code, message));
        Self::Validation {
            table: table.into(),
            violations,
        }
    }

    /// Create an expression parse error
    pub fn expression(message: impl Into<String>) -> Self {
        Self::Expression(message.into())
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Check if this is a validation-category error (bad caller input)
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Input(_)
                | Self::Validation { .. }
                | Self::UnallowedRelation(_)
                | Self::Expression(_)
                | Self::UnknownTable(_)
                | Self::UnknownRelation { .. }
        )
    }

    /// Check if this is a reference resolution error
    pub fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if this is a storage-category error (the transaction was rolled back)
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Query(_)
                | Self::UniqueViolation(_)
                | Self::ForeignKeyViolation(_)
                | Self::CheckViolation(_)
                | Self::Storage(_)
        )
    }

    /// Machine-readable violation payload keyed by field name.
    ///
    /// Returns `Some` for validation-category errors that carry per-field
    /// details, `None` otherwise.
    pub fn data(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation { violations, .. } => {
                serde_json::to_value(violations.by_field()).ok()
            }
            Self::UnallowedRelation(path) => {
                let mut violations = Violations::default();
                violations.push(Violation::new(
                    path.clone(),
                    ViolationCode::NotAllowed,
                    "relation is not allowed",
                ));
                serde_json::to_value(violations.by_field()).ok()
            }
            _ => None,
        }
    }

    /// Parse a tokio_postgres error into a more specific GraftError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                _ => {}
            }
        }
        Self::Query(err)
    }
}
