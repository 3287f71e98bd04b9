//! Institution domain models
//!
//! Institutions are the tenant groupings of the platform: they own member
//! users and books and cap both with [`Limit`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{InstitutionError, InstitutionResult};
use crate::ids::InstitutionId;
use crate::limits::Limit;

/// An institution groups users and books under shared limits.
///
/// # Architecture
///
/// ```text
/// Institution
///   ├─ Members (via InstitutionUser, at most one manager flag per user)
///   ├─ Books (via BookAssignment)
///   └─ Limits (book_limit, user_limit)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    /// Store-assigned identifier, never [`InstitutionId::UNSCOPED`]
    pub id: InstitutionId,

    /// Display name
    pub name: String,

    /// Maximum number of books
    pub book_limit: Limit,

    /// Maximum number of member users
    pub user_limit: Limit,

    /// When the institution was created
    pub created_at: DateTime<Utc>,

    /// When the institution was last updated
    pub updated_at: DateTime<Utc>,

    /// Custom metadata for extensibility
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Institution {
    /// Build the stored record for `new` under an assigned id.
    pub(crate) fn from_new(id: InstitutionId, new: NewInstitution) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: new.name,
            book_limit: new.book_limit,
            user_limit: new.user_limit,
            created_at: now,
            updated_at: now,
            metadata: new.metadata,
        }
    }

    /// Apply a partial update in place.
    ///
    /// The update must already have passed [`InstitutionUpdate::validate`].
    pub(crate) fn apply(&mut self, update: InstitutionUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(limit) = update.book_limit {
            self.book_limit = limit;
        }
        if let Some(limit) = update.user_limit {
            self.user_limit = limit;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
        self.updated_at = Utc::now();
    }
}

/// Input for creating an institution.
///
/// # Examples
///
/// ```
/// use institution_core::{Limit, NewInstitution};
///
/// let new = NewInstitution::new("Acme", Limit::Max(10), Limit::Max(10));
/// assert!(new.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInstitution {
    /// Display name, trimmed and non-empty
    pub name: String,

    /// Maximum number of books
    pub book_limit: Limit,

    /// Maximum number of member users
    pub user_limit: Limit,

    /// Initial metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewInstitution {
    /// Create input with the given name and limits and no metadata.
    pub fn new(name: impl Into<String>, book_limit: Limit, user_limit: Limit) -> Self {
        Self {
            name: name.into(),
            book_limit,
            user_limit,
            metadata: HashMap::new(),
        }
    }

    /// Create input from raw integer limits, as submitted by an admin form.
    ///
    /// Negative limits are rejected with [`InstitutionError::Validation`].
    pub fn from_raw(
        name: impl Into<String>,
        book_limit: i64,
        user_limit: i64,
    ) -> InstitutionResult<Self> {
        let new = Self::new(
            name,
            Limit::try_from(book_limit)?,
            Limit::try_from(user_limit)?,
        );
        new.validate()?;
        Ok(new)
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check the input without changing it. Stores trim the name when they
    /// save it.
    pub fn validate(&self) -> InstitutionResult<()> {
        validate_name(&self.name).map(|_| ())
    }

    /// Validated copy with a trimmed name.
    pub(crate) fn normalized(mut self) -> InstitutionResult<Self> {
        self.name = validate_name(&self.name)?;
        Ok(self)
    }
}

/// Partial update of an institution. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstitutionUpdate {
    /// New display name
    pub name: Option<String>,

    /// New book limit
    pub book_limit: Option<Limit>,

    /// New user limit
    pub user_limit: Option<Limit>,

    /// Replacement metadata map
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl InstitutionUpdate {
    /// Rename the institution.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Change the book limit.
    pub fn book_limit(mut self, limit: Limit) -> Self {
        self.book_limit = Some(limit);
        self
    }

    /// Change the user limit.
    pub fn user_limit(mut self, limit: Limit) -> Self {
        self.user_limit = Some(limit);
        self
    }

    /// Replace the metadata map.
    pub fn metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.book_limit.is_none()
            && self.user_limit.is_none()
            && self.metadata.is_none()
    }

    /// Validated copy with a trimmed name.
    pub(crate) fn normalized(mut self) -> InstitutionResult<Self> {
        if let Some(name) = self.name.take() {
            self.name = Some(validate_name(&name)?);
        }
        Ok(self)
    }
}

/// Summary of an institution for list displays, with current usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionSummary {
    /// Institution ID
    pub id: InstitutionId,

    /// Institution name
    pub name: String,

    /// Number of member users
    pub user_count: u64,

    /// Number of assigned books
    pub book_count: u64,

    /// Book limit
    pub book_limit: Limit,

    /// User limit
    pub user_limit: Limit,
}

fn validate_name(name: &str) -> InstitutionResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(InstitutionError::Validation(
            "institution name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}
