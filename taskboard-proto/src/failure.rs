//! Typed failures reported by a remote task store.

use serde::{Deserialize, Serialize};

/// A remote store failure.
///
/// Serialized with an internal `kind` tag so it can travel inside wire
/// responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// The caller is not allowed to touch this scope.
    #[error("unauthorized")]
    Unauthorized,

    /// The store does not have a requested column.
    #[error("unknown column: {column}")]
    UnknownColumn {
        /// The missing column name.
        column: String,
    },

    /// The store reported the target as not found.
    #[error("not found")]
    NotFound,

    /// The call did not complete (connect, timeout, closed connection).
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable cause.
        message: String,
    },

    /// Any other store error.
    #[error("store error: {message}")]
    Unknown {
        /// Human-readable cause.
        message: String,
    },
}

impl Failure {
    /// Builds a transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Builds an unknown failure.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Maps a PostgreSQL or PostgREST error code to a failure.
    ///
    /// `column` names the column for `42703`; the message is kept for codes
    /// with no dedicated variant.
    #[must_use]
    pub fn from_code(code: &str, column: Option<&str>, message: &str) -> Self {
        match code {
            "42703" => Self::UnknownColumn {
                column: column.unwrap_or_default().to_string(),
            },
            "42501" | "PGRST301" | "PGRST302" => Self::Unauthorized,
            "PGRST116" => Self::NotFound,
            _ => Self::unknown(format!("{code}: {message}")),
        }
    }

    /// Whether this failure means the store lacks a column.
    #[must_use]
    pub const fn is_unknown_column(&self) -> bool {
        matches!(self, Self::UnknownColumn { .. })
    }
}
