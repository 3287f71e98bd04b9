//! SQLite-backed store.
//!
//! Uniqueness lives in the schema rather than in application locks:
//!
//! - `institutions_users` is keyed by `(institution_id, user_id)`
//! - a partial unique index allows one `manager = 1` row per user
//! - `institutions_books` is keyed by `book_id`
//!
//! Multi-step writes run inside an `IMMEDIATE` transaction, so the write lock
//! is taken before the checks that gate the write. Several stores (or
//! processes) may share one database file: a writer that finds the file
//! locked waits up to [`BUSY_TIMEOUT`] instead of failing. Constraint
//! violations surface as [`InstitutionError::Conflict`].
//!
//! rusqlite is blocking, so every call runs on tokio's blocking pool while
//! holding the store's connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{BookAssignments, BookRegistry, InstitutionStore, MembershipStore};
use crate::config::DeletePolicy;
use crate::error::{InstitutionError, InstitutionResult};
use crate::ids::{BookId, InstitutionId, UserId};
use crate::institution::{Institution, InstitutionUpdate, NewInstitution};
use crate::limits::Limit;
use crate::membership::{BookAssignment, InstitutionUser};
use crate::quota::check_quota;

/// How long a write waits for another connection's lock on the same file.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS institutions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    book_limit INTEGER CHECK (book_limit IS NULL OR book_limit >= 0),
    user_limit INTEGER CHECK (user_limit IS NULL OR user_limit >= 0),
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS institutions_users (
    institution_id INTEGER NOT NULL REFERENCES institutions(id),
    user_id INTEGER NOT NULL,
    manager INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (institution_id, user_id)
);
CREATE UNIQUE INDEX IF NOT EXISTS institutions_users_single_manager
    ON institutions_users(user_id) WHERE manager = 1;
CREATE INDEX IF NOT EXISTS institutions_users_user ON institutions_users(user_id);
CREATE TABLE IF NOT EXISTS institutions_books (
    book_id INTEGER PRIMARY KEY,
    institution_id INTEGER NOT NULL REFERENCES institutions(id),
    assigned_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS institutions_books_institution
    ON institutions_books(institution_id);
";

const INSTITUTION_COLUMNS: &str =
    "id, name, book_limit, user_limit, metadata, created_at, updated_at";
const MEMBERSHIP_COLUMNS: &str = "user_id, institution_id, manager, created_at, updated_at";

impl From<rusqlite::Error> for InstitutionError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                InstitutionError::Conflict(msg.unwrap_or_else(|| err.to_string()))
            }
            other => InstitutionError::Storage(other.to_string()),
        }
    }
}

/// Raw `institutions` row before metadata is decoded.
struct InstitutionRow {
    id: u64,
    name: String,
    book_limit: Option<u32>,
    user_limit: Option<u32>,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl InstitutionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            book_limit: row.get(2)?,
            user_limit: row.get(3)?,
            metadata: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_institution(self) -> InstitutionResult<Institution> {
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&self.metadata)
            .map_err(|e| {
                InstitutionError::Storage(format!(
                    "corrupt metadata for institution {}: {}",
                    self.id, e
                ))
            })?;
        Ok(Institution {
            id: InstitutionId::new(self.id),
            name: self.name,
            book_limit: Limit::from(self.book_limit),
            user_limit: Limit::from(self.user_limit),
            created_at: self.created_at,
            updated_at: self.updated_at,
            metadata,
        })
    }
}

fn read_membership(row: &Row<'_>) -> rusqlite::Result<InstitutionUser> {
    Ok(InstitutionUser {
        user_id: UserId(row.get(0)?),
        institution_id: InstitutionId::new(row.get(1)?),
        manager: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn encode_metadata(metadata: &HashMap<String, serde_json::Value>) -> InstitutionResult<String> {
    serde_json::to_string(metadata)
        .map_err(|e| InstitutionError::Validation(format!("unencodable metadata: {}", e)))
}

/// Begin a transaction that holds the database write lock from the start.
fn immediate(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

fn fetch_institution(conn: &Connection, id: InstitutionId) -> InstitutionResult<Institution> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM institutions WHERE id = ?1", INSTITUTION_COLUMNS),
            params![id.get()],
            InstitutionRow::read,
        )
        .optional()?;
    row.ok_or_else(|| InstitutionError::institution_not_found(id))?
        .into_institution()
}

fn ensure_institution(conn: &Connection, id: InstitutionId) -> InstitutionResult<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM institutions WHERE id = ?1)",
        params![id.get()],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(InstitutionError::institution_not_found(id))
    }
}

fn insert_institution(conn: &Connection, new: NewInstitution) -> InstitutionResult<Institution> {
    let new = new.normalized()?;
    let now = Utc::now();
    conn.execute(
        "INSERT INTO institutions (name, book_limit, user_limit, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            new.name,
            new.book_limit.as_option(),
            new.user_limit.as_option(),
            encode_metadata(&new.metadata)?,
            now,
        ],
    )?;
    let id = InstitutionId::new(conn.last_insert_rowid() as u64);
    Ok(Institution {
        id,
        name: new.name,
        book_limit: new.book_limit,
        user_limit: new.user_limit,
        created_at: now,
        updated_at: now,
        metadata: new.metadata,
    })
}

fn count_members(conn: &Connection, institution_id: InstitutionId) -> InstitutionResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM institutions_users WHERE institution_id = ?1",
        params![institution_id.get()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn count_books(conn: &Connection, institution_id: InstitutionId) -> InstitutionResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM institutions_books WHERE institution_id = ?1",
        params![institution_id.get()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn membership_exists(
    conn: &Connection,
    user_id: UserId,
    institution_id: InstitutionId,
) -> InstitutionResult<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM institutions_users WHERE institution_id = ?1 AND user_id = ?2)",
        params![institution_id.get(), user_id.0],
        |row| row.get(0),
    )?)
}

fn book_owner(conn: &Connection, book_id: BookId) -> InstitutionResult<Option<InstitutionId>> {
    let id: Option<u64> = conn
        .query_row(
            "SELECT institution_id FROM institutions_books WHERE book_id = ?1",
            params![book_id.0],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(InstitutionId::new))
}

fn other_managed_institution(
    conn: &Connection,
    user_id: UserId,
    institution_id: InstitutionId,
) -> InstitutionResult<Option<InstitutionId>> {
    let id: Option<u64> = conn
        .query_row(
            "SELECT institution_id FROM institutions_users
             WHERE user_id = ?1 AND manager = 1 AND institution_id <> ?2
             ORDER BY institution_id LIMIT 1",
            params![user_id.0, institution_id.get()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(InstitutionId::new))
}

fn duplicate_membership(user_id: UserId, institution_id: InstitutionId) -> InstitutionError {
    InstitutionError::Conflict(format!(
        "user {} is already a member of institution {}",
        user_id, institution_id
    ))
}

fn insert_membership(
    conn: &Connection,
    user_id: UserId,
    institution_id: InstitutionId,
    manager: bool,
) -> InstitutionResult<InstitutionUser> {
    ensure_institution(conn, institution_id)?;
    if membership_exists(conn, user_id, institution_id)? {
        return Err(duplicate_membership(user_id, institution_id));
    }
    if manager {
        if let Some(existing) = other_managed_institution(conn, user_id, institution_id)? {
            return Err(InstitutionError::Conflict(format!(
                "user {} already manages institution {}",
                user_id, existing
            )));
        }
    }

    let mut membership = InstitutionUser::new(user_id, institution_id);
    membership.manager = manager;
    conn.execute(
        &format!(
            "INSERT INTO institutions_users ({}) VALUES (?1, ?2, ?3, ?4, ?5)",
            MEMBERSHIP_COLUMNS
        ),
        params![
            user_id.0,
            institution_id.get(),
            manager,
            membership.created_at,
            membership.updated_at,
        ],
    )?;
    Ok(membership)
}

fn upsert_book(
    conn: &Connection,
    book_id: BookId,
    institution_id: InstitutionId,
) -> InstitutionResult<BookAssignment> {
    let assignment = BookAssignment::new(book_id, institution_id);
    conn.execute(
        "INSERT INTO institutions_books (book_id, institution_id, assigned_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(book_id) DO UPDATE SET
            institution_id = excluded.institution_id,
            assigned_at = excluded.assigned_at",
        params![book_id.0, institution_id.get(), assignment.assigned_at],
    )?;
    Ok(assignment)
}

/// SQLite implementation of every store trait.
///
/// One connection is shared behind an async mutex. Cloning is cheap and
/// clones share the connection. Separate stores opened on the same file
/// coordinate through SQLite's own locking.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    delete_policy: DeletePolicy,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("delete_policy", &self.delete_policy)
            .finish()
    }
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`. `:memory:` opens a private
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>, delete_policy: DeletePolicy) -> InstitutionResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), policy = delete_policy.as_str(), "Opened institution database");
        Self::from_connection(conn, delete_policy)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(delete_policy: DeletePolicy) -> InstitutionResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, delete_policy)
    }

    /// Wrap an existing connection: set the busy timeout, enable foreign
    /// keys and WAL, and create the schema if needed.
    pub fn from_connection(conn: Connection, delete_policy: DeletePolicy) -> InstitutionResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            delete_policy,
        })
    }

    /// The delete policy this store applies.
    pub fn delete_policy(&self) -> DeletePolicy {
        self.delete_policy
    }

    /// Run `op` against the connection on the blocking pool.
    async fn run<T, F>(&self, op: F) -> InstitutionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> InstitutionResult<T> + Send + 'static,
    {
        let mut conn = self.conn.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || op(&mut conn))
            .await
            .map_err(|e| InstitutionError::Storage(format!("sqlite task failed: {}", e)))?
    }
}

#[async_trait]
impl InstitutionStore for SqliteStore {
    async fn create(&self, new: NewInstitution) -> InstitutionResult<Institution> {
        let institution = self.run(move |conn| insert_institution(conn, new)).await?;
        tracing::info!(
            institution_id = %institution.id,
            name = %institution.name,
            "Created institution"
        );
        Ok(institution)
    }

    async fn get(&self, id: InstitutionId) -> InstitutionResult<Institution> {
        let id = id.checked()?;
        self.run(move |conn| fetch_institution(conn, id)).await
    }

    async fn list(&self) -> InstitutionResult<Vec<Institution>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM institutions ORDER BY id",
                INSTITUTION_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], InstitutionRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(InstitutionRow::into_institution)
                .collect()
        })
        .await
    }

    async fn update(
        &self,
        id: InstitutionId,
        update: InstitutionUpdate,
    ) -> InstitutionResult<Institution> {
        let id = id.checked()?;
        let update = update.normalized()?;
        let institution = self
            .run(move |conn| {
                let tx = immediate(conn)?;
                let mut institution = fetch_institution(&tx, id)?;
                institution.apply(update);
                tx.execute(
                    "UPDATE institutions
                     SET name = ?1, book_limit = ?2, user_limit = ?3, metadata = ?4, updated_at = ?5
                     WHERE id = ?6",
                    params![
                        institution.name,
                        institution.book_limit.as_option(),
                        institution.user_limit.as_option(),
                        encode_metadata(&institution.metadata)?,
                        institution.updated_at,
                        id.get(),
                    ],
                )?;
                tx.commit()?;
                Ok(institution)
            })
            .await?;

        tracing::debug!(institution_id = %id, "Updated institution");
        Ok(institution)
    }

    async fn delete(&self, id: InstitutionId) -> InstitutionResult<()> {
        let id = id.checked()?;
        let policy = self.delete_policy;
        self.run(move |conn| {
            let tx = immediate(conn)?;
            ensure_institution(&tx, id)?;

            let members = count_members(&tx, id)?;
            let books = count_books(&tx, id)?;

            if policy == DeletePolicy::Restrict && (members > 0 || books > 0) {
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

            tx.execute(
                "DELETE FROM institutions_users WHERE institution_id = ?1",
                params![id.get()],
            )?;
            tx.execute(
                "DELETE FROM institutions_books WHERE institution_id = ?1",
                params![id.get()],
            )?;
            tx.execute("DELETE FROM institutions WHERE id = ?1", params![id.get()])?;
            tx.commit()?;

            tracing::info!(institution_id = %id, members, books, "Deleted institution");
            Ok(())
        })
        .await
    }

    async fn create_with_manager(
        &self,
        new: NewInstitution,
        manager: UserId,
    ) -> InstitutionResult<(Institution, InstitutionUser)> {
        let manager = manager.checked()?;
        let (institution, membership) = self
            .run(move |conn| {
                let tx = immediate(conn)?;
                // Dropping `tx` on any error below rolls the institution back.
                let institution = insert_institution(&tx, new)?;
                let membership = insert_membership(&tx, manager, institution.id, true)?;
                tx.commit()?;
                Ok((institution, membership))
            })
            .await?;

        tracing::info!(
            institution_id = %institution.id,
            user_id = %manager,
            "Created institution with manager"
        );
        Ok((institution, membership))
    }
}

#[async_trait]
impl MembershipStore for SqliteStore {
    async fn attach(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
        manager: bool,
    ) -> InstitutionResult<InstitutionUser> {
        let user_id = user_id.checked()?;
        let institution_id = institution_id.checked()?;
        let membership = self
            .run(move |conn| {
                let tx = immediate(conn)?;
                let membership = insert_membership(&tx, user_id, institution_id, manager)?;
                tx.commit()?;
                Ok(membership)
            })
            .await
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
            .run(move |conn| {
                let tx = immediate(conn)?;
                let limit = fetch_institution(&tx, institution_id)?.user_limit;
                if membership_exists(&tx, user_id, institution_id)? {
                    return Err(duplicate_membership(user_id, institution_id));
                }
                check_quota(institution_id, "users", limit, count_members(&tx, institution_id)?)?;
                let membership = insert_membership(&tx, user_id, institution_id, false)?;
                tx.commit()?;
                Ok(membership)
            })
            .await?;

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
        self.run(move |conn| {
            let tx = immediate(conn)?;

            if manager {
                if let Some(existing) = other_managed_institution(&tx, user_id, institution_id)? {
                    // Only report the conflict for an existing membership.
                    if !membership_exists(&tx, user_id, institution_id)? {
                        return Err(InstitutionError::membership_not_found(
                            user_id,
                            institution_id,
                        ));
                    }
                    return Err(InstitutionError::Conflict(format!(
                        "user {} already manages institution {}",
                        user_id, existing
                    )));
                }
            }

            let changed = tx.execute(
                "UPDATE institutions_users SET manager = ?1, updated_at = ?2
                 WHERE institution_id = ?3 AND user_id = ?4",
                params![manager, Utc::now(), institution_id.get(), user_id.0],
            )?;
            if changed == 0 {
                return Err(InstitutionError::membership_not_found(user_id, institution_id));
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        tracing::info!(%user_id, %institution_id, manager, "Changed manager flag");
        Ok(())
    }

    async fn find_managed_institution(
        &self,
        user_id: UserId,
    ) -> InstitutionResult<Option<InstitutionId>> {
        let user_id = user_id.checked()?;
        self.run(move |conn| {
            let id: Option<u64> = conn
                .query_row(
                    "SELECT institution_id FROM institutions_users
                     WHERE user_id = ?1 AND manager = 1
                     ORDER BY institution_id LIMIT 1",
                    params![user_id.0],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id.map(InstitutionId::new))
        })
        .await
    }

    async fn list_by_institution(
        &self,
        institution_id: InstitutionId,
    ) -> InstitutionResult<Vec<InstitutionUser>> {
        let institution_id = institution_id.checked()?;
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM institutions_users WHERE institution_id = ?1 ORDER BY user_id",
                MEMBERSHIP_COLUMNS
            ))?;
            let memberships = stmt
                .query_map(params![institution_id.get()], read_membership)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(memberships)
        })
        .await
    }

    async fn list_by_user(&self, user_id: UserId) -> InstitutionResult<Vec<InstitutionUser>> {
        let user_id = user_id.checked()?;
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM institutions_users WHERE user_id = ?1 ORDER BY institution_id",
                MEMBERSHIP_COLUMNS
            ))?;
            let memberships = stmt
                .query_map(params![user_id.0], read_membership)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(memberships)
        })
        .await
    }

    async fn detach(
        &self,
        user_id: UserId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<()> {
        let user_id = user_id.checked()?;
        let institution_id = institution_id.checked()?;
        let removed = self
            .run(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM institutions_users WHERE institution_id = ?1 AND user_id = ?2",
                    params![institution_id.get(), user_id.0],
                )?)
            })
            .await?;
        if removed == 0 {
            return Err(InstitutionError::membership_not_found(user_id, institution_id));
        }
        tracing::info!(%user_id, %institution_id, "Detached user from institution");
        Ok(())
    }

    async fn count_by_institution(&self, institution_id: InstitutionId) -> InstitutionResult<u64> {
        let institution_id = institution_id.checked()?;
        self.run(move |conn| count_members(conn, institution_id)).await
    }
}

#[async_trait]
impl BookRegistry for SqliteStore {
    async fn count_books(&self, institution_id: InstitutionId) -> InstitutionResult<u64> {
        let institution_id = institution_id.checked()?;
        self.run(move |conn| count_books(conn, institution_id)).await
    }

    async fn books_of(&self, institution_id: InstitutionId) -> InstitutionResult<Vec<BookId>> {
        let institution_id = institution_id.checked()?;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT book_id FROM institutions_books WHERE institution_id = ?1 ORDER BY book_id",
            )?;
            let books = stmt
                .query_map(params![institution_id.get()], |row| row.get(0).map(BookId))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(books)
        })
        .await
    }
}

#[async_trait]
impl BookAssignments for SqliteStore {
    async fn assign_book(
        &self,
        book_id: BookId,
        institution_id: InstitutionId,
    ) -> InstitutionResult<BookAssignment> {
        let book_id = book_id.checked()?;
        let institution_id = institution_id.checked()?;
        let assignment = self
            .run(move |conn| {
                let tx = immediate(conn)?;
                ensure_institution(&tx, institution_id)?;
                let assignment = upsert_book(&tx, book_id, institution_id)?;
                tx.commit()?;
                Ok(assignment)
            })
            .await?;

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
        let assignment = self
            .run(move |conn| {
                let tx = immediate(conn)?;
                let limit = fetch_institution(&tx, institution_id)?.book_limit;
                if book_owner(&tx, book_id)? != Some(institution_id) {
                    check_quota(institution_id, "books", limit, count_books(&tx, institution_id)?)?;
                }
                let assignment = upsert_book(&tx, book_id, institution_id)?;
                tx.commit()?;
                Ok(assignment)
            })
            .await?;

        tracing::info!(%book_id, %institution_id, "Assigned book to institution");
        Ok(assignment)
    }

    async fn unassign_book(&self, book_id: BookId) -> InstitutionResult<()> {
        let book_id = book_id.checked()?;
        let removed = self
            .run(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM institutions_books WHERE book_id = ?1",
                    params![book_id.0],
                )?)
            })
            .await?;
        if removed == 0 {
            return Err(InstitutionError::NotFound {
                entity: "Book assignment",
                id: book_id.to_string(),
            });
        }
        Ok(())
    }

    async fn institution_of_book(
        &self,
        book_id: BookId,
    ) -> InstitutionResult<Option<InstitutionId>> {
        let book_id = book_id.checked()?;
        self.run(move |conn| book_owner(conn, book_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(policy: DeletePolicy) -> SqliteStore {
        SqliteStore::open_in_memory(policy).unwrap()
    }

    #[tokio::test]
    async fn test_metadata_round_trips() {
        let store = store(DeletePolicy::Restrict);
        let created = store
            .create(
                NewInstitution::new("Acme", Limit::Unlimited, Limit::Max(3))
                    .with_metadata("region", serde_json::json!("north")),
            )
            .await
            .unwrap();

        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.book_limit, Limit::Unlimited);
        assert_eq!(fetched.user_limit, Limit::Max(3));
        assert_eq!(fetched.metadata["region"], serde_json::json!("north"));
    }

    #[tokio::test]
    async fn test_single_manager_index_is_a_backstop() {
        let store = store(DeletePolicy::Restrict);
        let a = store
            .create(NewInstitution::new("A", Limit::Max(1), Limit::Max(1)))
            .await
            .unwrap();
        let b = store
            .create(NewInstitution::new("B", Limit::Max(1), Limit::Max(1)))
            .await
            .unwrap();
        store.attach(UserId(9), a.id, true).await.unwrap();
        store.attach(UserId(9), b.id, false).await.unwrap();

        // Bypass the application check and hit the partial unique index.
        let conn = store.conn.lock().await;
        let err: InstitutionError = conn
            .execute(
                "UPDATE institutions_users SET manager = 1 WHERE institution_id = ?1 AND user_id = ?2",
                params![b.id.get(), 9u64],
            )
            .unwrap_err()
            .into();
        assert!(matches!(err, InstitutionError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let store = store(DeletePolicy::Restrict);
        let first = store
            .create(NewInstitution::new("A", Limit::Max(1), Limit::Max(1)))
            .await
            .unwrap();
        store.delete(first.id).await.unwrap();

        let second = store
            .create(NewInstitution::new("B", Limit::Max(1), Limit::Max(1)))
            .await
            .unwrap();
        assert!(second.id > first.id);
    }

    fn temp_db(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "institutions-{}-{}-{}.db",
            tag,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    fn remove_db(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[tokio::test]
    async fn test_busy_timeout_is_set() {
        let store = store(DeletePolicy::Restrict);
        let conn = store.conn.lock().await;
        let timeout_ms: i64 = conn
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout_ms, BUSY_TIMEOUT.as_millis() as i64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writer_waits_for_other_connection() {
        let path = temp_db("busy");
        let store = SqliteStore::open(&path, DeletePolicy::Restrict).unwrap();
        let inst = store
            .create(NewInstitution::new("Locked", Limit::Max(5), Limit::Max(5)))
            .await
            .unwrap();

        // A second connection holds the write lock for a moment.
        let mut other = Connection::open(&path).unwrap();
        let release = std::thread::spawn(move || {
            let tx = immediate(&mut other).unwrap();
            std::thread::sleep(Duration::from_millis(300));
            tx.commit().unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        store.attach(UserId(1), inst.id, false).await.unwrap();
        release.join().unwrap();
        assert_eq!(store.count_by_institution(inst.id).await.unwrap(), 1);

        drop(store);
        remove_db(&path);
    }

    #[tokio::test]
    async fn test_gated_book_assignment() {
        let store = store(DeletePolicy::Restrict);
        let inst = store
            .create(NewInstitution::new("One Book", Limit::Max(1), Limit::Max(1)))
            .await
            .unwrap();

        store.assign_book_within_limit(BookId(4), inst.id).await.unwrap();
        store.assign_book_within_limit(BookId(4), inst.id).await.unwrap();
        let err = store
            .assign_book_within_limit(BookId(5), inst.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InstitutionError::QuotaExceeded {
                resource: "books",
                limit: 1
            }
        ));
        assert_eq!(store.institution_of_book(BookId(5)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reopen_file_keeps_data() {
        let dir = temp_db("reopen");

        let id = {
            let store = SqliteStore::open(&dir, DeletePolicy::Restrict).unwrap();
            store
                .create(NewInstitution::new("Persisted", Limit::Max(2), Limit::Max(2)))
                .await
                .unwrap()
                .id
        };

        let reopened = SqliteStore::open(&dir, DeletePolicy::Restrict).unwrap();
        assert_eq!(reopened.get(id).await.unwrap().name, "Persisted");

        drop(reopened);
        remove_db(&dir);
    }
}
