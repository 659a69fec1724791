// Error Types
// Typed failures raised by statements, results, adapters, the scheduler and the pool

use crate::db::value::Params;
use serde::Serialize;
use std::fmt;

/// Diagnostic reported by the underlying client library
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverDiagnostic {
    /// Native error code (SQLite extended result code or PostgreSQL SQLSTATE)
    pub code: Option<String>,
    pub message: String,
}

impl DriverDiagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }
}

impl fmt::Display for DriverDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl From<rusqlite::Error> for DriverDiagnostic {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message) => Self {
                code: Some(failure.extended_code.to_string()),
                message: message.clone().unwrap_or_else(|| failure.to_string()),
            },
            _ => Self::new(err.to_string()),
        }
    }
}

impl From<tokio_postgres::Error> for DriverDiagnostic {
    fn from(err: tokio_postgres::Error) -> Self {
        match err.as_db_error() {
            Some(db_error) => Self {
                code: Some(db_error.code().code().to_string()),
                message: db_error.message().to_string(),
            },
            None => Self {
                code: err.code().map(|state| state.code().to_string()),
                message: err.to_string(),
            },
        }
    }
}

/// Query text and bound values captured when binding fails
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementSnapshot {
    pub query: String,
    pub values: Option<Params>,
}

impl StatementSnapshot {
    pub fn new(query: impl Into<String>, values: Option<Params>) -> Self {
        Self {
            query: query.into(),
            values,
        }
    }
}

/// Why a set of values could not be bound to a statement
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingFailure {
    #[error("Number of variables doesn't match number of parameters in prepared statement (expected {expected}, given {given})")]
    CountMismatch { expected: usize, given: usize },

    #[error("No value supplied for placeholder :{0}")]
    UnmatchedPlaceholder(String),

    #[error("Named and positional placeholders cannot be mixed in one statement")]
    MixedPlaceholders,

    #[error("{0}")]
    Driver(DriverDiagnostic),
}

/// Error type shared by every component of the access layer
#[derive(Debug, thiserror::Error)]
pub enum DbalError {
    #[error("Access denied: {0}")]
    AccessDenied(DriverDiagnostic),

    #[error("{0}")]
    MaxReconnect(String),

    #[error("Parameter binding failed for `{}`: {cause}", .statement.query)]
    ParamBinding {
        statement: Box<StatementSnapshot>,
        cause: BindingFailure,
    },

    #[error("Query failed: {0}")]
    Query(DriverDiagnostic),

    #[error("Result unavailable: {0}")]
    ResultUnavailable(String),

    #[error("This result is frozen. You have to re-execute this statement.")]
    FrozenResult,

    #[error("Cast of type {0} is impossible")]
    Cast(String),

    #[error("Invalid option `{key}`: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("No connection available to {0} database.")]
    NoConnection(String),
}

impl DbalError {
    pub(crate) fn binding(snapshot: StatementSnapshot, cause: BindingFailure) -> Self {
        DbalError::ParamBinding {
            statement: Box::new(snapshot),
            cause,
        }
    }

    /// Native error code carried by driver-originated errors
    pub fn code(&self) -> Option<&str> {
        match self {
            DbalError::AccessDenied(diag) | DbalError::Query(diag) => diag.code.as_deref(),
            DbalError::ParamBinding {
                cause: BindingFailure::Driver(diag),
                ..
            } => diag.code.as_deref(),
            _ => None,
        }
    }

    /// Statement captured by a binding failure
    pub fn statement(&self) -> Option<&StatementSnapshot> {
        match self {
            DbalError::ParamBinding { statement, .. } => Some(statement.as_ref()),
            _ => None,
        }
    }

    /// True for errors raised while establishing or re-establishing a link
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbalError::AccessDenied(_) | DbalError::MaxReconnect(_))
    }
}
