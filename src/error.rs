//! Frameguard error types.
//!
//! # Rejection Classes
//!
//! Three error variants represent a rejected request and are raised to the
//! immediate caller (the API layer):
//!
//! - [`GuardError::Validation`]: the field is known but its value violates the
//!   type, range, or format of its rule. Recoverable: the caller answers its own
//!   client with a 4xx-equivalent.
//! - [`GuardError::SecurityViolation`]: the input matched a threat signature.
//!   Always rejected and always audited.
//! - [`GuardError::Timeout`]: pattern evaluation exceeded its wall-clock
//!   budget. Classified as a security violation (fail-closed).
//!
//! The remaining variants cover configuration and I/O failures outside the
//! request path.

use thiserror::Error;

/// Frameguard errors.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Field value violates its validation rule.
    #[error("Validation failed for field `{field}`: {reason}")]
    Validation {
        /// Offending field name.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Input matched one or more threat signatures.
    #[error("Security violation in field `{field}`: {signature} (risk {score:.2})")]
    SecurityViolation {
        /// Top-level field the threat was found in (`<query>` for the root).
        field: String,
        /// Name of the highest-severity signature that matched.
        signature: String,
        /// Aggregate risk score (0.0-1.0).
        score: f32,
    },

    /// Pattern evaluation exceeded its budget.
    #[error("Threat evaluation of field `{field}` exceeded {budget_ms}ms budget")]
    Timeout {
        /// Field being evaluated when the budget ran out.
        field: String,
        /// Configured budget in milliseconds.
        budget_ms: u64,
    },

    /// Query root is not a JSON object.
    #[error("Query must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Build a validation error.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GuardError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Field this error is attributed to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            GuardError::Validation { field, .. }
            | GuardError::SecurityViolation { field, .. }
            | GuardError::Timeout { field, .. } => Some(field),
            _ => None,
        }
    }

    /// True for errors that must be treated as attacks (violations and timeouts).
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            GuardError::SecurityViolation { .. } | GuardError::Timeout { .. }
        )
    }

    /// True for errors that reject a client request (as opposed to
    /// configuration or I/O failures).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GuardError::Validation { .. }
                | GuardError::SecurityViolation { .. }
                | GuardError::Timeout { .. }
                | GuardError::NotAnObject(_)
        )
    }
}

/// Result type alias for Frameguard operations
pub type Result<T> = std::result::Result<T, GuardError>;

impl From<toml::de::Error> for GuardError {
    fn from(err: toml::de::Error) -> Self {
        GuardError::Config(err.to_string())
    }
}
