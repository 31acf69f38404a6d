//! Error types for core storage and model operations.
//!
//! The config store is the only fallible collaborator at this layer; its
//! failures are surfaced as `CoreError::Store` and propagated to callers
//! rather than retried internally.

use thiserror::Error;

use crate::store::ConfigKey;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for config-store operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Backing-store read or write failed.
    #[error("config store error: {message}")]
    Store {
        /// Description of the storage failure
        message: String,
    },

    /// A persisted value had an unexpected type or shape.
    #[error("invalid stored value for key {key}")]
    InvalidValue {
        /// Key whose value could not be interpreted
        key: ConfigKey,
    },
}

impl CoreError {
    /// Creates a store error from a message.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    /// Creates an invalid-value error for a key.
    pub fn invalid_value(key: ConfigKey) -> Self {
        Self::InvalidValue { key }
    }
}
