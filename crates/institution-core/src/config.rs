//! Configuration for the institution service.
//!
//! Configuration is loaded from environment variables with defaults suitable
//! for tests and local development (in-memory store, restrictive deletes,
//! ten books and ten users per new institution).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::limits::Limit;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },

    /// A backend was requested that this build does not include.
    #[error("Store backend not available in this build: {0}")]
    BackendUnavailable(String),
}

/// What happens to memberships and book assignments when their institution
/// is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse the delete while anything references the institution
    #[default]
    Restrict,

    /// Remove dependents along with the institution
    Cascade,
}

impl DeletePolicy {
    /// Parse policy from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "restrict" => Some(Self::Restrict),
            "cascade" => Some(Self::Cascade),
            _ => None,
        }
    }

    /// Get string representation of the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restrict => "restrict",
            Self::Cascade => "cascade",
        }
    }
}

/// Institution service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionConfig {
    /// SQLite database path. `None` selects the in-memory store.
    pub database_path: Option<PathBuf>,

    /// Delete behaviour for institutions with dependents.
    pub delete_policy: DeletePolicy,

    /// Book limit applied when a create request leaves it out.
    pub default_book_limit: Limit,

    /// User limit applied when a create request leaves it out.
    pub default_user_limit: Limit,
}

impl Default for InstitutionConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            delete_policy: DeletePolicy::Restrict,
            default_book_limit: Limit::Max(10),
            default_user_limit: Limit::Max(10),
        }
    }
}

const DATABASE_PATH: &str = "INSTITUTIONS_DATABASE_PATH";
const DELETE_POLICY: &str = "INSTITUTIONS_DELETE_POLICY";
const DEFAULT_BOOK_LIMIT: &str = "INSTITUTIONS_DEFAULT_BOOK_LIMIT";
const DEFAULT_USER_LIMIT: &str = "INSTITUTIONS_DEFAULT_USER_LIMIT";

impl InstitutionConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or malformed.
    ///
    /// Environment variables:
    /// - `INSTITUTIONS_DATABASE_PATH`: SQLite file (`:memory:` for an
    ///   in-memory database). Unset selects the in-memory store.
    /// - `INSTITUTIONS_DELETE_POLICY`: `restrict` (default) or `cascade`
    /// - `INSTITUTIONS_DEFAULT_BOOK_LIMIT`: integer or `unlimited` (default: 10)
    /// - `INSTITUTIONS_DEFAULT_USER_LIMIT`: integer or `unlimited` (default: 10)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            database_path: std::env::var(DATABASE_PATH)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            delete_policy: std::env::var(DELETE_POLICY)
                .ok()
                .and_then(|s| DeletePolicy::parse(&s))
                .unwrap_or(default.delete_policy),
            default_book_limit: std::env::var(DEFAULT_BOOK_LIMIT)
                .ok()
                .and_then(|s| Limit::parse(&s))
                .unwrap_or(default.default_book_limit),
            default_user_limit: std::env::var(DEFAULT_USER_LIMIT)
                .ok()
                .and_then(|s| Limit::parse(&s))
                .unwrap_or(default.default_user_limit),
        }
    }

    /// Load configuration from environment variables, rejecting malformed
    /// values instead of falling back.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Strict loader over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup(DATABASE_PATH).filter(|s| !s.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup(DELETE_POLICY) {
            config.delete_policy =
                DeletePolicy::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: DELETE_POLICY.to_string(),
                    message: format!("expected 'restrict' or 'cascade', got '{}'", raw),
                })?;
        }
        if let Some(raw) = lookup(DEFAULT_BOOK_LIMIT) {
            config.default_book_limit = parse_limit(DEFAULT_BOOK_LIMIT, &raw)?;
        }
        if let Some(raw) = lookup(DEFAULT_USER_LIMIT) {
            config.default_user_limit = parse_limit(DEFAULT_USER_LIMIT, &raw)?;
        }

        Ok(config)
    }

    /// Use a SQLite database at `path`.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Use the given delete policy.
    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Validate that the selected backend is compiled in.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.is_some() && !cfg!(feature = "sqlite") {
            return Err(ConfigError::BackendUnavailable("sqlite".to_string()));
        }
        if self.database_path.is_none() && !cfg!(feature = "memory") {
            return Err(ConfigError::BackendUnavailable("memory".to_string()));
        }
        Ok(())
    }
}

fn parse_limit(key: &str, raw: &str) -> Result<Limit, ConfigError> {
    Limit::parse(raw).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a non-negative integer or 'unlimited', got '{}'", raw),
    })
}
