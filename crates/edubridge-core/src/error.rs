//! Error types for the EduBridge session service.
//!
//! One enum covers configuration loading, snapshot persistence, the
//! invitation workflow and authentication. The HTTP layer maps each variant
//! to a status code and the failure envelope.

use std::path::PathBuf;

/// A specialized `Result` type for EduBridge operations.
pub type Result<T> = std::result::Result<T, EduError>;

/// Errors that can occur in the session service.
#[derive(Debug, thiserror::Error)]
pub enum EduError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your edubridge.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// A field is missing or invalid.
    #[error("{0}")]
    Validation(String),

    /// The referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record, e.g. "session".
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Role or ownership mismatch.
    #[error("{0}")]
    Forbidden(String),

    /// The request clashes with existing data (duplicate email, full session).
    #[error("{0}")]
    Conflict(String),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    // ========================================================================
    // External Collaborators
    // ========================================================================
    /// An external service (the email provider) failed.
    #[error("{service} failed: {message}")]
    ExternalService {
        /// Name of the collaborator.
        service: String,
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Snapshot file contains JSON that cannot be loaded.
    #[error("Corrupted data file '{path}': {message}\n\nSuggestion: Restore the file from a backup or move it aside to start empty")]
    StateFileCorrupted {
        /// Path to the corrupted snapshot.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unexpected failure inside the service (hashing, token signing).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EduError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a new `ExternalService` error.
    #[must_use]
    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a new `StateFileCorrupted` error.
    #[must_use]
    pub fn state_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StateFileCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if the caller can fix this error by changing the request.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound { .. }
                | Self::Unauthorized(_)
                | Self::Forbidden(_)
                | Self::Conflict(_)
                | Self::InvalidStateTransition { .. }
        )
    }
}

impl From<edubridge_mailer::MailError> for EduError {
    fn from(err: edubridge_mailer::MailError) -> Self {
        Self::external("email provider", err.to_string())
    }
}
