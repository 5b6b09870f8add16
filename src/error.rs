//! Error types for the adapter layer.
//!
//! Driver errors are wrapped at the adapter boundary with a stable context
//! message. `ErrorKind` is what callers branch on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for adapter, registry and connection-manager operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Coarse error classification exposed to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Pool creation or validation failed, or the adapter is not connected
    Connection,
    /// A statement failed inside the database
    Query,
    /// A precondition on the request was not met
    Validation,
    /// A profile, live connection or adapter type does not exist
    NotFound,
    /// Profile persistence failed
    Storage,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("not connected")]
    NotConnected,

    #[error("{context}: {source}")]
    Query {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("no adapter registered for type '{0}'")]
    UnknownAdapter(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    pub fn connection(message: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn query(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Query {
            context: context.into(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::NotConnected => ErrorKind::Connection,
            Self::Query { .. } => ErrorKind::Query,
            Self::Validation(_) => ErrorKind::Validation,
            Self::UnknownAdapter(_) | Self::ProfileNotFound(_) | Self::ConnectionNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }
}

/// Builds a `map_err` closure that wraps a driver error with `context`.
pub(crate) fn wrap(context: &'static str) -> impl FnOnce(sqlx::Error) -> DbError {
    move |e| DbError::query(context, e)
}
