//! Institution service
//!
//! Wires one store backend, the quota evaluator and the access resolver
//! together, and provides the quota-gated onboarding helpers used by admin
//! flows.

use std::sync::Arc;
use tracing::instrument;

use crate::access::AccessResolver;
use crate::config::{ConfigError, InstitutionConfig};
use crate::error::{InstitutionError, InstitutionResult};
use crate::ids::{BookId, InstitutionId, UserId};
use crate::institution::{Institution, InstitutionSummary, NewInstitution};
use crate::limits::Limit;
use crate::membership::{BookAssignment, InstitutionUser};
use crate::quota::QuotaEvaluator;
use crate::store::{BookAssignments, BookRegistry, InstitutionStore, MembershipStore, Store};

/// Entry point bundling stores, quota evaluation and access resolution.
#[derive(Clone)]
pub struct InstitutionService {
    institutions: Arc<dyn InstitutionStore>,
    memberships: Arc<dyn MembershipStore>,
    books: Arc<dyn BookRegistry>,
    assignments: Arc<dyn BookAssignments>,
    quota: QuotaEvaluator,
    access: AccessResolver,
    default_book_limit: Limit,
    default_user_limit: Limit,
}

impl std::fmt::Debug for InstitutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstitutionService")
            .field("default_book_limit", &self.default_book_limit)
            .field("default_user_limit", &self.default_user_limit)
            .finish_non_exhaustive()
    }
}

impl InstitutionService {
    /// Build a service over a backend that implements every store trait,
    /// with the default limits from [`InstitutionConfig::default`].
    pub fn new<S>(store: S) -> Self
    where
        S: Store + 'static,
    {
        Self::with_config(store, &InstitutionConfig::default())
    }

    /// Build a service over `store`, taking default limits from `config`.
    pub fn with_config<S>(store: S, config: &InstitutionConfig) -> Self
    where
        S: Store + 'static,
    {
        let store = Arc::new(store);
        let institutions: Arc<dyn InstitutionStore> = store.clone();
        let memberships: Arc<dyn MembershipStore> = store.clone();
        let books: Arc<dyn BookRegistry> = store.clone();
        let assignments: Arc<dyn BookAssignments> = store;

        Self {
            quota: QuotaEvaluator::new(institutions.clone(), memberships.clone(), books.clone()),
            access: AccessResolver::new(memberships.clone()),
            institutions,
            memberships,
            books,
            assignments,
            default_book_limit: config.default_book_limit,
            default_user_limit: config.default_user_limit,
        }
    }

    /// Open the backend selected by `config`: SQLite when a database path is
    /// set, the in-memory store otherwise.
    pub fn from_config(config: &InstitutionConfig) -> InstitutionResult<Self> {
        config.validate()?;

        match &config.database_path {
            #[cfg(feature = "sqlite")]
            Some(path) => {
                let store = crate::store::sqlite::SqliteStore::open(path, config.delete_policy)?;
                Ok(Self::with_config(store, config))
            }
            #[cfg(feature = "memory")]
            None => {
                tracing::info!(
                    policy = config.delete_policy.as_str(),
                    "Using in-memory institution store"
                );
                let store = crate::store::memory::MemoryStore::with_policy(config.delete_policy);
                Ok(Self::with_config(store, config))
            }
            #[allow(unreachable_patterns)]
            _ => Err(InstitutionError::Config(ConfigError::BackendUnavailable(
                "no store backend compiled in".to_string(),
            ))),
        }
    }

    /// Institution store.
    pub fn institutions(&self) -> &dyn InstitutionStore {
        self.institutions.as_ref()
    }

    /// Membership store.
    pub fn memberships(&self) -> &dyn MembershipStore {
        self.memberships.as_ref()
    }

    /// Book registry.
    pub fn books(&self) -> &dyn BookRegistry {
        self.books.as_ref()
    }

    /// Quota evaluator.
    pub fn quota(&self) -> &QuotaEvaluator {
        &self.quota
    }

    /// Access resolver.
    pub fn access(&self) -> &AccessResolver {
        &self.access
    }

    /// Create an institution, filling in configured default limits.
    #[instrument(skip(self, name))]
    pub async fn create_institution(
        &self,
        name: impl Into<String>,
        book_limit: Option<Limit>,
        user_limit: Option<Limit>,
    ) -> InstitutionResult<Institution> {
        self.institutions
            .create(NewInstitution::new(
                name,
                book_limit.unwrap_or(self.default_book_limit),
                user_limit.unwrap_or(self.default_user_limit),
            ))
            .await
    }

    /// Create an institution together with its manager, atomically.
    #[instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create_institution_with_manager(
        &self,
        new: NewInstitution,
        manager: UserId,
    ) -> InstitutionResult<(Institution, InstitutionUser)> {
        self.institutions.create_with_manager(new, manager).await
    }

    /// Attach a user as a plain member, within the user quota.
    ///
    /// The quota check and the insert are atomic in the store, so concurrent
    /// enrolments never push an institution past its limit. `QuotaExceeded`
    /// when the institution is full.
    #[instrument(skip(self))]
    pub async fn enroll_user(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<InstitutionUser> {
        self.memberships
            .attach_within_limit(user_id, institution_id)
            .await
    }

    /// Assign a book within the book quota.
    ///
    /// Reassigning a book to the institution that already owns it does not
    /// count against the quota.
    #[instrument(skip(self))]
    pub async fn assign_book(
        &self,
        book_id: BookId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<BookAssignment> {
        self.assignments
            .assign_book_within_limit(book_id, institution_id)
            .await
    }

    /// Remove a book's institution assignment.
    pub async fn unassign_book(&self, book_id: BookId) -> InstitutionResult<()> {
        self.assignments.unassign_book(book_id).await
    }

    /// Summaries of every institution with current usage.
    pub async fn summaries(&self) -> InstitutionResult<Vec<InstitutionSummary>> {
        let mut summaries = Vec::new();
        for institution in self.institutions.list().await? {
            let usage = self.quota.usage(institution.id).await?;
            summaries.push(InstitutionSummary {
                id: institution.id,
                name: institution.name,
                user_count: usage.user_count,
                book_count: usage.book_count,
                book_limit: institution.book_limit,
                user_limit: institution.user_limit,
            });
        }
        Ok(summaries)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::config::DeletePolicy;

    #[tokio::test]
    async fn test_defaults_applied() {
        let config = InstitutionConfig {
            default_book_limit: Limit::Max(3),
            default_user_limit: Limit::Unlimited,
            ..InstitutionConfig::default()
        };
        let service = InstitutionService::from_config(&config).unwrap();

        let inst = service
            .create_institution("Defaults", None, Some(Limit::Max(1)))
            .await
            .unwrap();
        assert_eq!(inst.book_limit, Limit::Max(3));
        assert_eq!(inst.user_limit, Limit::Max(1));

        let inst = service
            .create_institution("Defaults 2", None, None)
            .await
            .unwrap();
        assert_eq!(inst.user_limit, Limit::Unlimited);
    }

    #[tokio::test]
    async fn test_enroll_user_respects_quota() {
        let service = InstitutionService::new(crate::store::memory::MemoryStore::new());
        let inst = service
            .create_institution("Tiny", None, Some(Limit::Max(1)))
            .await
            .unwrap();

        service.enroll_user(UserId(1), inst.id).await.unwrap();
        let err = service.enroll_user(UserId(2), inst.id).await.unwrap_err();
        assert_eq!(err.error_code(), "QUOTA_EXCEEDED");
        assert_eq!(service.quota().user_count(inst.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reassigning_owned_book_skips_quota() {
        let service = InstitutionService::new(crate::store::memory::MemoryStore::new());
        let inst = service
            .create_institution("One Book", Some(Limit::Max(1)), None)
            .await
            .unwrap();

        service.assign_book(BookId(1), inst.id).await.unwrap();
        service.assign_book(BookId(1), inst.id).await.unwrap();
        assert!(service.assign_book(BookId(2), inst.id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enrolment_stops_at_limit() {
        let service = InstitutionService::new(crate::store::memory::MemoryStore::new());
        let inst = service
            .create_institution("Race", None, Some(Limit::Max(3)))
            .await
            .unwrap();

        let handles: Vec<_> = (1..=32)
            .map(|user| {
                let service = service.clone();
                tokio::spawn(async move { service.enroll_user(UserId(user), inst.id).await })
            })
            .collect();

        let mut enrolled = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => enrolled += 1,
                Err(e) => assert_eq!(e.error_code(), "QUOTA_EXCEEDED"),
            }
        }
        assert_eq!(enrolled, 3);
        assert_eq!(service.quota().user_count(inst.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_summaries() {
        let config = InstitutionConfig::default().with_delete_policy(DeletePolicy::Cascade);
        let service = InstitutionService::from_config(&config).unwrap();
        let a = service.create_institution("A", None, None).await.unwrap();
        service.create_institution("B", None, None).await.unwrap();
        service.enroll_user(UserId(5), a.id).await.unwrap();
        service.assign_book(BookId(9), a.id).await.unwrap();

        let summaries = service.summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].user_count, 1);
        assert_eq!(summaries[0].book_count, 1);
        assert_eq!(summaries[1].user_count, 0);
    }
}
