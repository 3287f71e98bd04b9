//! Error types for institution operations
//!
//! This module defines the error taxonomy shared by the stores, the quota
//! evaluator, the access resolver and the service layer.

use thiserror::Error;

use crate::config::ConfigError;

/// Institution error types.
///
/// None of these are retried internally: they are either caller mistakes or
/// business-rule rejections, never transient faults.
#[derive(Debug, Error)]
pub enum InstitutionError {
    /// Malformed input to a create or update operation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Referenced institution or membership does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record that was looked up
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Duplicate membership, second managed institution, or blocked delete
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A user or book limit would be exceeded
    #[error("Quota exceeded: {resource} limit of {limit} reached")]
    QuotaExceeded {
        /// Which quota was hit ("users" or "books")
        resource: &'static str,
        /// The configured limit
        limit: u32,
    },

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for institution operations.
pub type InstitutionResult<T> = Result<T, InstitutionError>;

impl InstitutionError {
    /// Shorthand for a missing institution.
    pub fn institution_not_found(id: impl ToString) -> Self {
        InstitutionError::NotFound {
            entity: "Institution",
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing (user, institution) membership.
    pub fn membership_not_found(user_id: impl ToString, institution_id: impl ToString) -> Self {
        InstitutionError::NotFound {
            entity: "Membership",
            id: format!(
                "user {} in institution {}",
                user_id.to_string(),
                institution_id.to_string()
            ),
        }
    }

    /// Check if this error should be logged at error level.
    ///
    /// Validation, conflicts and quota rejections are expected outcomes.
    pub fn is_server_error(&self) -> bool {
        matches!(self, InstitutionError::Storage(_) | InstitutionError::Config(_))
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            InstitutionError::Validation(_) => 400,
            InstitutionError::NotFound { .. } => 404,
            InstitutionError::Conflict(_) => 409,
            InstitutionError::QuotaExceeded { .. } => 422,
            InstitutionError::Storage(_) | InstitutionError::Config(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            InstitutionError::Validation(_) => "VALIDATION_ERROR",
            InstitutionError::NotFound { .. } => "NOT_FOUND",
            InstitutionError::Conflict(_) => "CONFLICT",
            InstitutionError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            InstitutionError::Storage(_) => "STORAGE_ERROR",
            InstitutionError::Config(_) => "CONFIG_ERROR",
        }
    }
}
