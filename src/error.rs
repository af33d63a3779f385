//! Error types for statecell.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the specific failure instead of parsing messages.

use thiserror::Error;

/// Errors raised while canonicalizing a value for fingerprinting.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    #[error("Value nesting exceeds maximum depth of {max_depth} (possible reference cycle)")]
    DepthExceeded {
        max_depth: usize,
    },

    #[error("Map key must be a string, char, bool or integer, got {kind}")]
    KeyMustBeString {
        kind: &'static str,
    },

    #[error("Serialize implementation failed: {message}")]
    Custom {
        message: String,
    },
}

impl serde::ser::Error for SerializationError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Self::Custom {
            message: msg.to_string(),
        }
    }
}

/// Top-level error type for statecell.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Key '{key}' holds a {stored} cell, requested {requested}")]
    TypeMismatch {
        key: String,
        stored: &'static str,
        requested: &'static str,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl StateError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a serialization error.
    #[must_use]
    pub const fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    /// Returns true if this is a type mismatch on a registry key.
    #[must_use]
    pub const fn is_type_mismatch(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for statecell operations.
pub type StateResult<T> = Result<T, StateError>;
