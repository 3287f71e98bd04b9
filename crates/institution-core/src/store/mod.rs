//! Storage abstractions and backends
//!
//! The store traits describe the persistence contract for institutions,
//! memberships and book assignments. Two backends ship with this crate:
//!
//! - [`memory::MemoryStore`] (feature `memory`): single-process, for tests and
//!   embedded use.
//! - [`sqlite::SqliteStore`] (feature `sqlite`): SQLite through `rusqlite`,
//!   with uniqueness enforced by table constraints.
//!
//! Every write is atomic. A failed call leaves the store as it was.
//!
//! Identifiers above [`MAX_ID`](crate::ids::MAX_ID) are rejected with
//! `Validation` by every operation.

use async_trait::async_trait;

use crate::error::InstitutionResult;
use crate::ids::{BookId, InstitutionId, UserId};
use crate::institution::{Institution, InstitutionUpdate, NewInstitution};
use crate::membership::{BookAssignment, InstitutionUser};

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Persistence of institution records.
#[async_trait]
pub trait InstitutionStore: Send + Sync {
    /// Create an institution.
    ///
    /// Fails with `Validation` when the name is blank.
    async fn create(&self, new: NewInstitution) -> InstitutionResult<Institution>;

    /// Fetch an institution, `NotFound` if absent.
    async fn get(&self, id: InstitutionId) -> InstitutionResult<Institution>;

    /// All institutions ordered by id.
    async fn list(&self) -> InstitutionResult<Vec<Institution>>;

    /// Apply a partial update, `NotFound` if absent.
    async fn update(
        &self,
        id: InstitutionId,
        update: InstitutionUpdate,
    ) -> InstitutionResult<Institution>;

    /// Delete an institution according to the store's
    /// [`DeletePolicy`](crate::config::DeletePolicy).
    ///
    /// `NotFound` if absent. Under `Restrict`, `Conflict` while memberships or
    /// book assignments reference it.
    async fn delete(&self, id: InstitutionId) -> InstitutionResult<()>;

    /// Create an institution and attach `manager` as its manager in one
    /// transaction. If the attach fails the institution is not kept.
    async fn create_with_manager(
        &self,
        new: NewInstitution,
        manager: UserId,
    ) -> InstitutionResult<(Institution, InstitutionUser)>;
}

/// Persistence of user-to-institution memberships.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Attach a user to an institution.
    ///
    /// - `NotFound` if the institution does not exist
    /// - `Conflict` if the pair already exists
    /// - `Conflict` if `manager` is set and the user already manages another
    ///   institution
    async fn attach(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
        manager: bool,
    ) -> InstitutionResult<InstitutionUser>;

    /// Attach a non-manager member if the institution's user limit leaves
    /// room. The count and the insert happen in one atomic step.
    ///
    /// Errors as [`attach`](MembershipStore::attach), checked first, then
    /// `QuotaExceeded` when the institution is full.
    async fn attach_within_limit(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<InstitutionUser>;

    /// Set or clear the manager flag on an existing membership.
    ///
    /// `NotFound` if the membership is absent. `Conflict` when granting would
    /// give the user a second managed institution.
    async fn set_manager(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
        manager: bool,
    ) -> InstitutionResult<()>;

    /// The institution this user manages, if any.
    async fn find_managed_institution(
        &self,
        user_id: UserId,
    ) -> InstitutionResult<Option<InstitutionId>>;

    /// Memberships of an institution ordered by user id.
    async fn list_by_institution(
        &self,
        institution_id: InstitutionId,
    ) -> InstitutionResult<Vec<InstitutionUser>>;

    /// Memberships of a user ordered by institution id.
    async fn list_by_user(&self, user_id: UserId) -> InstitutionResult<Vec<InstitutionUser>>;

    /// Remove a membership, `NotFound` if absent.
    async fn detach(&self, user_id: UserId, institution_id: InstitutionId)
        -> InstitutionResult<()>;

    /// Number of memberships of an institution.
    async fn count_by_institution(&self, institution_id: InstitutionId) -> InstitutionResult<u64>;
}

/// Read access to which books an institution owns.
///
/// The host platform may supply its own registry; both stores in this crate
/// implement it from their book assignments.
#[async_trait]
pub trait BookRegistry: Send + Sync {
    /// Number of books owned by the institution.
    async fn count_books(&self, institution_id: InstitutionId) -> InstitutionResult<u64>;

    /// Books owned by the institution ordered by id.
    async fn books_of(&self, institution_id: InstitutionId) -> InstitutionResult<Vec<BookId>>;
}

/// Persistence of book-to-institution assignments.
#[async_trait]
pub trait BookAssignments: Send + Sync {
    /// Assign a book to an institution, moving it if it is already assigned
    /// elsewhere. `NotFound` if the institution does not exist.
    async fn assign_book(
        &self,
        book_id: BookId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<BookAssignment>;

    /// Assign a book if the institution's book limit leaves room, in one
    /// atomic step. Re-assigning a book to the institution that already owns
    /// it never counts against the limit.
    ///
    /// `NotFound` if the institution does not exist, `QuotaExceeded` when it
    /// is full.
    async fn assign_book_within_limit(
        &self,
        book_id: BookId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<BookAssignment>;

    /// Remove a book's assignment, `NotFound` if it has none.
    async fn unassign_book(&self, book_id: BookId) -> InstitutionResult<()>;

    /// The institution owning the book, if any.
    async fn institution_of_book(&self, book_id: BookId)
        -> InstitutionResult<Option<InstitutionId>>;
}

/// A backend implementing every store trait.
pub trait Store: InstitutionStore + MembershipStore + BookRegistry + BookAssignments {}

impl<T> Store for T where T: InstitutionStore + MembershipStore + BookRegistry + BookAssignments {}
