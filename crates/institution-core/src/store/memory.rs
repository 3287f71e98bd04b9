//! In-memory store implementation.
//!
//! Suitable for single-process deployments and testing. All state sits behind
//! one lock, so each operation validates and mutates under a single write
//! guard and is atomic with respect to every other operation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{BookAssignments, BookRegistry, InstitutionStore, MembershipStore};
use crate::config::DeletePolicy;
use crate::error::{InstitutionError, InstitutionResult};
use crate::ids::{BookId, InstitutionId, UserId};
use crate::institution::{Institution, InstitutionUpdate, NewInstitution};
use crate::membership::{BookAssignment, InstitutionUser};
use crate::quota::check_quota;

#[derive(Debug)]
struct MemoryState {
    /// Next institution id to hand out
    next_id: u64,
    institutions: BTreeMap<InstitutionId, Institution>,
    /// Keyed by institution first so per-institution scans are range reads
    memberships: BTreeMap<(InstitutionId, UserId), InstitutionUser>,
    books: BTreeMap<BookId, BookAssignment>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            next_id: 1,
            institutions: BTreeMap::new(),
            memberships: BTreeMap::new(),
            books: BTreeMap::new(),
        }
    }
}

impl MemoryState {
    fn ensure_institution(&self, id: InstitutionId) -> InstitutionResult<()> {
        if self.institutions.contains_key(&id) {
            Ok(())
        } else {
            Err(InstitutionError::institution_not_found(id))
        }
    }

    fn institution(&self, id: InstitutionId) -> InstitutionResult<&Institution> {
        self.institutions
            .get(&id)
            .ok_or_else(|| InstitutionError::institution_not_found(id))
    }

    fn book_count(&self, institution_id: InstitutionId) -> u64 {
        self.books
            .values()
            .filter(|b| b.institution_id == institution_id)
            .count() as u64
    }

    fn insert_institution(&mut self, new: NewInstitution) -> InstitutionResult<Institution> {
        let new = new.normalized()?;
        let id = InstitutionId::new(self.next_id);
        self.next_id += 1;
        let institution = Institution::from_new(id, new);
        self.institutions.insert(id, institution.clone());
        Ok(institution)
    }

    fn memberships_of_institution(
        &self,
        institution_id: InstitutionId,
    ) -> impl Iterator<Item = &InstitutionUser> {
        self.memberships
            .range((institution_id, UserId(0))..=(institution_id, UserId(u64::MAX)))
            .map(|(_, m)| m)
    }

    /// Manager memberships of `user_id`, in institution id order.
    fn managed_by(&self, user_id: UserId) -> impl Iterator<Item = &InstitutionUser> {
        self.memberships
            .values()
            .filter(move |m| m.user_id == user_id && m.manager)
    }

    fn check_can_manage(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<()> {
        match self
            .managed_by(user_id)
            .find(|m| m.institution_id != institution_id)
        {
            Some(existing) => Err(InstitutionError::Conflict(format!(
                "user {} already manages institution {}",
                user_id, existing.institution_id
            ))),
            None => Ok(()),
        }
    }

    fn insert_membership(
        &mut self,
        user_id: UserId,
        institution_id: InstitutionId,
        manager: bool,
    ) -> InstitutionResult<InstitutionUser> {
        self.ensure_institution(institution_id)?;
        if self.memberships.contains_key(&(institution_id, user_id)) {
            return Err(InstitutionError::Conflict(format!(
                "user {} is already a member of institution {}",
                user_id, institution_id
            )));
        }
        if manager {
            self.check_can_manage(user_id, institution_id)?;
        }

        let mut membership = InstitutionUser::new(user_id, institution_id);
        membership.manager = manager;
        self.memberships
            .insert((institution_id, user_id), membership.clone());
        Ok(membership)
    }

    fn insert_member_within_limit(
        &mut self,
        user_id: UserId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<InstitutionUser> {
        let limit = self.institution(institution_id)?.user_limit;
        if self.memberships.contains_key(&(institution_id, user_id)) {
            return Err(InstitutionError::Conflict(format!(
                "user {} is already a member of institution {}",
                user_id, institution_id
            )));
        }
        let count = self.memberships_of_institution(institution_id).count() as u64;
        check_quota(institution_id, "users", limit, count)?;
        self.insert_membership(user_id, institution_id, false)
    }

    fn upsert_book(&mut self, book_id: BookId, institution_id: InstitutionId) -> BookAssignment {
        let assignment = BookAssignment::new(book_id, institution_id);
        self.books.insert(book_id, assignment.clone());
        assignment
    }
}

/// In-memory implementation of every store trait.
///
/// Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    delete_policy: DeletePolicy,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("delete_policy", &self.delete_policy)
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store with the `Restrict` delete policy.
    pub fn new() -> Self {
        Self::with_policy(DeletePolicy::Restrict)
    }

    /// Create an empty store with the given delete policy.
    pub fn with_policy(delete_policy: DeletePolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            delete_policy,
        }
    }

    /// The delete policy this store applies.
    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstitutionStore for MemoryStore {
    async fn create(&self, new: NewInstitution) -> InstitutionResult<Institution> {
        let institution = self.state.write().await.insert_institution(new)?;
        tracing::info!(
            institution_id = %institution.id,
            name = %institution.name,
            "Created institution"
        );
        Ok(institution)
    }

    async fn get(&self, id: InstitutionId) -> InstitutionResult<Institution> {
        let id = id.checked()?;
        self.state.read().await.institution(id).cloned()
    }

    async fn list(&self) -> InstitutionResult<Vec<Institution>> {
        Ok(self
            .state
            .read()
            .await
            .institutions
            .values()
            .cloned()
            .collect())
    }

    async fn update(
        &self,
        id: InstitutionId,
        update: InstitutionUpdate,
    ) -> InstitutionResult<Institution> {
        let id = id.checked()?;
        let update = update.normalized()?;
        let mut state = self.state.write().await;
        let institution = state
            .institutions
            .get_mut(&id)
            .ok_or_else(|| InstitutionError::institution_not_found(id))?;
        institution.apply(update);
        tracing::debug!(institution_id = %id, "Updated institution");
        Ok(institution.clone())
    }

    async fn delete(&self, id: InstitutionId) -> InstitutionResult<()> {
        let id = id.checked()?;
        let mut state = self.state.write().await;
        state.ensure_institution(id)?;

        let members = state.memberships_of_institution(id).count();
        let books = state.book_count(id);

        if self.delete_policy == DeletePolicy::Restrict && (members > 0 || books > 0) {
            tracing::warn!(
                institution_id = %id,
                members,
                books,
                "Refusing to delete institution with dependents"
            );
            return Err(InstitutionError::Conflict(format!(
                "institution {} still has {} member(s) and {} book(s)",
                id, members, books
            )));
        }

        state.memberships.retain(|(inst, _), _| *inst != id);
        state.books.retain(|_, b| b.institution_id != id);
        state.institutions.remove(&id);
        tracing::info!(institution_id = %id, members, books, "Deleted institution");
        Ok(())
    }

    async fn create_with_manager(
        &self,
        new: NewInstitution,
        manager: UserId,
    ) -> InstitutionResult<(Institution, InstitutionUser)> {
        let manager = manager.checked()?;
        let mut state = self.state.write().await;
        // Checked up front so a rejected manager never consumes an id.
        if let Some(existing) = state.managed_by(manager).next() {
            return Err(InstitutionError::Conflict(format!(
                "user {} already manages institution {}",
                manager, existing.institution_id
            )));
        }
        let institution = state.insert_institution(new)?;
        let membership = match state.insert_membership(manager, institution.id, true) {
            Ok(membership) => membership,
            Err(e) => {
                state.institutions.remove(&institution.id);
                return Err(e);
            }
        };
        tracing::info!(
            institution_id = %institution.id,
            user_id = %manager,
            "Created institution with manager"
        );
        Ok((institution, membership))
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn attach(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
        manager: bool,
    ) -> InstitutionResult<InstitutionUser> {
        let user_id = user_id.checked()?;
        let institution_id = institution_id.checked()?;
        let membership = self
            .state
            .write()
            .await
            .insert_membership(user_id, institution_id, manager)
            .map_err(|e| {
                tracing::warn!(%user_id, %institution_id, error = %e, "Attach rejected");
                e
            })?;
        tracing::info!(%user_id, %institution_id, manager, "Attached user to institution");
        Ok(membership)
    }

    async fn attach_within_limit(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<InstitutionUser> {
        let user_id = user_id.checked()?;
        let institution_id = institution_id.checked()?;
        let membership = self
            .state
            .write()
            .await
            .insert_member_within_limit(user_id, institution_id)?;
        tracing::info!(%user_id, %institution_id, "Enrolled user in institution");
        Ok(membership)
    }

    async fn set_manager(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
        manager: bool,
    ) -> InstitutionResult<()> {
        let user_id = user_id.checked()?;
        let institution_id = institution_id.checked()?;
        let mut state = self.state.write().await;
        if !state.memberships.contains_key(&(institution_id, user_id)) {
            return Err(InstitutionError::membership_not_found(
                user_id,
                institution_id,
            ));
        }
        if manager {
            state.check_can_manage(user_id, institution_id)?;
        }
        if let Some(membership) = state.memberships.get_mut(&(institution_id, user_id)) {
            membership.set_manager(manager);
        }
        tracing::info!(%user_id, %institution_id, manager, "Changed manager flag");
        Ok(())
    }

    async fn find_managed_institution(
        &self,
        user_id: UserId,
    ) -> InstitutionResult<Option<InstitutionId>> {
        let user_id = user_id.checked()?;
        let state = self.state.read().await;
        Ok(state
            .managed_by(user_id)
            .map(|m| m.institution_id)
            .min())
    }

    async fn list_by_institution(
        &self,
        institution_id: InstitutionId,
    ) -> InstitutionResult<Vec<InstitutionUser>> {
        let institution_id = institution_id.checked()?;
        let state = self.state.read().await;
        Ok(state
            .memberships_of_institution(institution_id)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: UserId) -> InstitutionResult<Vec<InstitutionUser>> {
        let user_id = user_id.checked()?;
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn detach(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<()> {
        let user_id = user_id.checked()?;
        let institution_id = institution_id.checked()?;
        let removed = self
            .state
            .write()
            .await
            .memberships
            .remove(&(institution_id, user_id));
        match removed {
            Some(_) => {
                tracing::info!(%user_id, %institution_id, "Detached user from institution");
                Ok(())
            }
            None => Err(InstitutionError::membership_not_found(
                user_id,
                institution_id,
            )),
        }
    }

    async fn count_by_institution(&self, institution_id: InstitutionId) -> InstitutionResult<u64> {
        let institution_id = institution_id.checked()?;
        let state = self.state.read().await;
        Ok(state.memberships_of_institution(institution_id).count() as u64)
    }
}

#[async_trait]
impl BookRegistry for MemoryStore {
    async fn count_books(&self, institution_id: InstitutionId) -> InstitutionResult<u64> {
        let institution_id = institution_id.checked()?;
        Ok(self.state.read().await.book_count(institution_id))
    }

    async fn books_of(&self, institution_id: InstitutionId) -> InstitutionResult<Vec<BookId>> {
        let institution_id = institution_id.checked()?;
        let state = self.state.read().await;
        Ok(state
            .books
            .values()
            .filter(|b| b.institution_id == institution_id)
            .map(|b| b.book_id)
            .collect())
    }
}

#[async_trait]
impl BookAssignments for MemoryStore {
    async fn assign_book(
        &self,
        book_id: BookId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<BookAssignment> {
        let book_id = book_id.checked()?;
        let institution_id = institution_id.checked()?;
        let mut state = self.state.write().await;
        state.ensure_institution(institution_id)?;
        let assignment = state.upsert_book(book_id, institution_id);
        tracing::info!(%book_id, %institution_id, "Assigned book to institution");
        Ok(assignment)
    }

    async fn assign_book_within_limit(
        &self,
        book_id: BookId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<BookAssignment> {
        let book_id = book_id.checked()?;
        let institution_id = institution_id.checked()?;
        let mut state = self.state.write().await;
        let limit = state.institution(institution_id)?.book_limit;
        let owner = state.books.get(&book_id).map(|b| b.institution_id);
        if owner != Some(institution_id) {
            check_quota(institution_id, "books", limit, state.book_count(institution_id))?;
        }
        let assignment = state.upsert_book(book_id, institution_id);
        tracing::info!(%book_id, %institution_id, "Assigned book to institution");
        Ok(assignment)
    }

    async fn unassign_book(&self, book_id: BookId) -> InstitutionResult<()> {
        let book_id = book_id.checked()?;
        match self.state.write().await.books.remove(&book_id) {
            Some(_) => Ok(()),
            None => Err(InstitutionError::NotFound {
                entity: "Book assignment",
                id: book_id.to_string(),
            }),
        }
    }

    async fn institution_of_book(
        &self,
        book_id: BookId,
    ) -> InstitutionResult<Option<InstitutionId>> {
        let book_id = book_id.checked()?;
        let state = self.state.read().await;
        Ok(state.books.get(&book_id).map(|b| b.institution_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::Limit;

    fn acme() -> NewInstitution {
        NewInstitution::new("Acme", Limit::Max(10), Limit::Max(10))
    }

    #[tokio::test]
    async fn test_ids_start_at_one() {
        let store = MemoryStore::new();
        let first = store.create(acme()).await.unwrap();
        let second = store.create(acme()).await.unwrap();

        assert_eq!(first.id, InstitutionId::new(1));
        assert_eq!(second.id, InstitutionId::new(2));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        let institution = store.create(acme()).await.unwrap();

        assert_eq!(clone.get(institution.id).await.unwrap().name, "Acme");
    }

    #[tokio::test]
    async fn test_rejected_manager_does_not_consume_id() {
        let store = MemoryStore::new();
        store
            .create_with_manager(acme(), UserId(1))
            .await
            .unwrap();

        let err = store
            .create_with_manager(acme(), UserId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, InstitutionError::Conflict(_)));

        let next = store.create(acme()).await.unwrap();
        assert_eq!(next.id, InstitutionId::new(2));
    }

    #[tokio::test]
    async fn test_gated_attach_checks_membership_before_quota() {
        let store = MemoryStore::new();
        let inst = store
            .create(NewInstitution::new("Full", Limit::Max(1), Limit::Max(1)))
            .await
            .unwrap();
        store.attach_within_limit(UserId(1), inst.id).await.unwrap();

        let err = store.attach_within_limit(UserId(1), inst.id).await.unwrap_err();
        assert!(matches!(err, InstitutionError::Conflict(_)));

        let err = store.attach_within_limit(UserId(2), inst.id).await.unwrap_err();
        assert!(matches!(
            err,
            InstitutionError::QuotaExceeded {
                resource: "users",
                limit: 1
            }
        ));
        assert_eq!(store.count_by_institution(inst.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unassign_missing_book() {
        let store = MemoryStore::new();
        let err = store.unassign_book(BookId(5)).await.unwrap_err();
        assert!(matches!(err, InstitutionError::NotFound { .. }));
    }
}
