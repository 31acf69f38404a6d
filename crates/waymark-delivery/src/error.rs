//! Error types for delivery operations.
//!
//! Recoverable conditions (missing prerequisites, failed requests) are
//! returned as values and handled by the caller's retry policy: tail
//! requeue for waypoints, silent drop for visit batches. Backing-store
//! failures propagate unchanged; nothing here is fatal to the embedder.

use std::fmt;

use thiserror::Error;
use waymark_core::CoreError;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// A value a delivery depends on that has not been resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prerequisite {
    /// Auth hash identifying the installation.
    Credential,
    /// Backend base URL from the companion application.
    BaseUrl,
    /// Companion application version.
    AppVersion,
}

impl fmt::Display for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential => write!(f, "credential"),
            Self::BaseUrl => write!(f, "base URL"),
            Self::AppVersion => write!(f, "app version"),
        }
    }
}

/// Error type for outbound delivery and prerequisite resolution.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// A prerequisite is not yet resolvable; retry later.
    #[error("prerequisite unavailable: {missing}")]
    PrerequisiteUnavailable {
        /// Which prerequisite was missing
        missing: Prerequisite,
    },

    /// The backend answered with a non-2xx status.
    #[error("delivery failed: HTTP {status}")]
    HttpStatus {
        /// HTTP status code of the response
        status: u16,
    },

    /// Transport-level failure before a response was received.
    #[error("network error: {message}")]
    Network {
        /// Description of the transport failure
        message: String,
    },

    /// The request exceeded the client timeout.
    #[error("request timeout after {seconds}s")]
    Timeout {
        /// Configured timeout in seconds
        seconds: u64,
    },

    /// A 2xx response was missing an expected field.
    #[error("malformed response: missing field {field}")]
    MalformedResponse {
        /// Name of the absent field
        field: &'static str,
    },

    /// Backing-store read or write failed.
    #[error(transparent)]
    Store(#[from] CoreError),
}

impl DeliveryError {
    /// Creates a missing-prerequisite error.
    pub fn missing(prerequisite: Prerequisite) -> Self {
        Self::PrerequisiteUnavailable { missing: prerequisite }
    }

    /// Creates an HTTP status error.
    pub fn http_status(status: u16) -> Self {
        Self::HttpStatus { status }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout { seconds }
    }

    /// Creates a malformed-response error for a missing field.
    pub fn malformed(field: &'static str) -> Self {
        Self::MalformedResponse { field }
    }

    /// Whether a later attempt of the same operation can succeed.
    ///
    /// Everything but a backing-store failure is recoverable by retrying:
    /// prerequisites resolve once the companion answers, HTTP and transport
    /// failures are transient, and a malformed body does not poison the
    /// next request. Store failures are propagated, never retried here.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Store(_))
    }
}
