//! Quota evaluation
//!
//! The evaluator compares an institution's current usage with its limits.
//! It only reads: callers decide whether to reject a creation, usually via
//! the `ensure_*` helpers which turn a `false` into
//! [`InstitutionError::QuotaExceeded`].
//!
//! An `ensure_*` check followed by a separate write can race with another
//! writer. Gated writes that must hold under concurrency go through
//! [`MembershipStore::attach_within_limit`] and
//! [`BookAssignments::assign_book_within_limit`], which check and write in
//! one atomic step.
//!
//! [`BookAssignments::assign_book_within_limit`]: crate::store::BookAssignments::assign_book_within_limit

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{InstitutionError, InstitutionResult};
use crate::ids::InstitutionId;
use crate::limits::Limit;
use crate::store::{BookRegistry, InstitutionStore, MembershipStore};

/// `QuotaExceeded` unless `limit` leaves room for one more `resource` on top
/// of `count`. Stores call this inside the same lock or transaction as the
/// write it gates.
pub(crate) fn check_quota(
    institution_id: InstitutionId,
    resource: &'static str,
    limit: Limit,
    count: u64,
) -> InstitutionResult<()> {
    match limit {
        Limit::Max(max) if !limit.allows(count) => {
            tracing::warn!(%institution_id, resource, limit = max, count, "Quota exceeded");
            Err(InstitutionError::QuotaExceeded {
                resource,
                limit: max,
            })
        }
        _ => Ok(()),
    }
}

/// Current usage of an institution against its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Institution the usage belongs to
    pub institution_id: InstitutionId,

    /// Number of member users
    pub user_count: u64,

    /// Configured user limit
    pub user_limit: Limit,

    /// Number of owned books
    pub book_count: u64,

    /// Configured book limit
    pub book_limit: Limit,
}

impl QuotaUsage {
    /// Whether one more user fits.
    pub fn can_add_user(&self) -> bool {
        self.user_limit.allows(self.user_count)
    }

    /// Whether one more book fits.
    pub fn can_add_book(&self) -> bool {
        self.book_limit.allows(self.book_count)
    }

    /// Free user slots, `None` when unlimited.
    pub fn remaining_users(&self) -> Option<u64> {
        self.user_limit.remaining(self.user_count)
    }

    /// Free book slots, `None` when unlimited.
    pub fn remaining_books(&self) -> Option<u64> {
        self.book_limit.remaining(self.book_count)
    }
}

/// Evaluates institution usage against configured limits.
#[derive(Clone)]
pub struct QuotaEvaluator {
    institutions: Arc<dyn InstitutionStore>,
    memberships: Arc<dyn MembershipStore>,
    books: Arc<dyn BookRegistry>,
}

impl std::fmt::Debug for QuotaEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaEvaluator").finish_non_exhaustive()
    }
}

impl QuotaEvaluator {
    /// Create an evaluator over the given stores and book registry.
    pub fn new(
        institutions: Arc<dyn InstitutionStore>,
        memberships: Arc<dyn MembershipStore>,
        books: Arc<dyn BookRegistry>,
    ) -> Self {
        Self {
            institutions,
            memberships,
            books,
        }
    }

    /// Number of memberships of the institution.
    pub async fn user_count(&self, institution_id: InstitutionId) -> InstitutionResult<u64> {
        self.memberships.count_by_institution(institution_id).await
    }

    /// Number of books the registry attributes to the institution.
    pub async fn book_count(&self, institution_id: InstitutionId) -> InstitutionResult<u64> {
        self.books.count_books(institution_id).await
    }

    /// Whether the institution may take one more user.
    ///
    /// `NotFound` if the institution does not exist.
    pub async fn can_add_user(&self, institution_id: InstitutionId) -> InstitutionResult<bool> {
        let institution = self.institutions.get(institution_id).await?;
        let count = self.user_count(institution_id).await?;
        let allowed = institution.user_limit.allows(count);
        tracing::debug!(
            %institution_id,
            count,
            limit = %institution.user_limit,
            allowed,
            "Evaluated user quota"
        );
        Ok(allowed)
    }

    /// Whether the institution may take one more book.
    ///
    /// `NotFound` if the institution does not exist.
    pub async fn can_add_book(&self, institution_id: InstitutionId) -> InstitutionResult<bool> {
        let institution = self.institutions.get(institution_id).await?;
        let count = self.book_count(institution_id).await?;
        let allowed = institution.book_limit.allows(count);
        tracing::debug!(
            %institution_id,
            count,
            limit = %institution.book_limit,
            allowed,
            "Evaluated book quota"
        );
        Ok(allowed)
    }

    /// Both counts and both limits in one report.
    pub async fn usage(&self, institution_id: InstitutionId) -> InstitutionResult<QuotaUsage> {
        let institution = self.institutions.get(institution_id).await?;
        Ok(QuotaUsage {
            institution_id,
            user_count: self.user_count(institution_id).await?,
            user_limit: institution.user_limit,
            book_count: self.book_count(institution_id).await?,
            book_limit: institution.book_limit,
        })
    }

    /// `QuotaExceeded` unless the institution may take one more user.
    pub async fn ensure_can_add_user(&self, institution_id: InstitutionId) -> InstitutionResult<()> {
        let usage = self.usage(institution_id).await?;
        check_quota(institution_id, "users", usage.user_limit, usage.user_count)
    }

    /// `QuotaExceeded` unless the institution may take one more book.
    pub async fn ensure_can_add_book(&self, institution_id: InstitutionId) -> InstitutionResult<()> {
        let usage = self.usage(institution_id).await?;
        check_quota(institution_id, "books", usage.book_limit, usage.book_count)
    }
}
