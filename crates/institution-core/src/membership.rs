//! Membership domain models
//!
//! This module provides the records linking platform users and books to
//! institutions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BookId, InstitutionId, UserId};

/// Membership linking a user to an institution.
///
/// A (user, institution) pair appears at most once, and a user holds the
/// manager flag on at most one institution.
///
/// # Examples
///
/// ```
/// use institution_core::{InstitutionId, InstitutionUser, UserId};
///
/// let membership = InstitutionUser::new(UserId(42), InstitutionId::new(1)).as_manager();
/// assert!(membership.manager);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionUser {
    /// User ID
    pub user_id: UserId,

    /// Institution ID
    pub institution_id: InstitutionId,

    /// Whether the user manages this institution
    pub manager: bool,

    /// When the user was attached
    pub created_at: DateTime<Utc>,

    /// When the manager flag last changed
    pub updated_at: DateTime<Utc>,
}

impl InstitutionUser {
    /// Creates a plain (non-manager) membership.
    pub fn new(user_id: UserId, institution_id: InstitutionId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            institution_id,
            manager: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Flag the membership as a manager membership.
    pub fn as_manager(mut self) -> Self {
        self.manager = true;
        self
    }

    /// Change the manager flag, bumping `updated_at`.
    pub(crate) fn set_manager(&mut self, manager: bool) {
        self.manager = manager;
        self.updated_at = Utc::now();
    }
}

/// Assignment of a book to the institution that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookAssignment {
    /// Book ID
    pub book_id: BookId,

    /// Owning institution
    pub institution_id: InstitutionId,

    /// When the book was assigned
    pub assigned_at: DateTime<Utc>,
}

impl BookAssignment {
    /// Creates an assignment stamped now.
    pub fn new(book_id: BookId, institution_id: InstitutionId) -> Self {
        Self {
            book_id,
            institution_id,
            assigned_at: Utc::now(),
        }
    }
}
