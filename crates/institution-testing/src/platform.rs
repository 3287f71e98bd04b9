//! Fake host platform
//!
//! Stands in for the publishing platform's user table, super admin grants,
//! network-manager list and book sites.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;

use institution_core::{BookId, InstitutionResult, PlatformPermissions, UserId};

/// A platform user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeUser {
    /// User ID
    pub id: UserId,
    /// Login name, unique on the platform
    pub user_login: String,
    /// Email address
    pub user_email: String,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
}

/// A book site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeBook {
    /// Site ID
    pub id: BookId,
    /// Site path, `/{slug}/`
    pub path: String,
    /// Book title
    pub title: String,
}

#[derive(Debug)]
struct PlatformState {
    next_user_id: u64,
    users: BTreeMap<UserId, FakeUser>,
    super_admins: BTreeSet<UserId>,
    network_managers: Vec<UserId>,
    // Site 1 is the network's main site, books start at 2.
    next_book_id: u64,
    books: BTreeMap<BookId, FakeBook>,
    current_book: Option<BookId>,
}

impl Default for PlatformState {
    fn default() -> Self {
        Self {
            next_user_id: 1,
            users: BTreeMap::new(),
            super_admins: BTreeSet::new(),
            network_managers: Vec::new(),
            next_book_id: 2,
            books: BTreeMap::new(),
            current_book: None,
        }
    }
}

/// In-memory host platform.
///
/// A super admin on the network-manager list is restricted. Every other user,
/// including unlisted super admins, is not.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: RwLock<PlatformState>,
}

impl FakePlatform {
    /// Create an empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user, replacing any existing user with the same login.
    pub async fn create_user(
        &self,
        user_login: impl Into<String>,
        user_email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> UserId {
        let user_login = user_login.into();
        let mut state = self.state.write().await;

        let stale: Vec<UserId> = state
            .users
            .values()
            .filter(|u| u.user_login == user_login)
            .map(|u| u.id)
            .collect();
        for id in stale {
            state.users.remove(&id);
            state.super_admins.remove(&id);
            state.network_managers.retain(|m| *m != id);
            tracing::debug!(user_id = %id, login = %user_login, "Replaced existing fake user");
        }

        let id = UserId(state.next_user_id);
        state.next_user_id += 1;
        state.users.insert(
            id,
            FakeUser {
                id,
                user_login,
                user_email: user_email.into(),
                first_name: first_name.into(),
                last_name: last_name.into(),
            },
        );
        id
    }

    /// Look up a user.
    pub async fn user(&self, id: UserId) -> Option<FakeUser> {
        self.state.read().await.users.get(&id).cloned()
    }

    /// Look up a user by login.
    pub async fn user_by_login(&self, user_login: &str) -> Option<FakeUser> {
        self.state
            .read()
            .await
            .users
            .values()
            .find(|u| u.user_login == user_login)
            .cloned()
    }

    /// Number of users on the platform.
    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    /// Grant network-wide super admin.
    pub async fn grant_super_admin(&self, id: UserId) {
        self.state.write().await.super_admins.insert(id);
    }

    /// Whether the user is a super admin.
    pub async fn is_super_admin(&self, id: UserId) -> bool {
        self.state.read().await.super_admins.contains(&id)
    }

    /// Put a user on the network-manager list, which restricts them.
    pub async fn add_network_manager(&self, id: UserId) {
        let mut state = self.state.write().await;
        if !state.network_managers.contains(&id) {
            state.network_managers.push(id);
        }
    }

    /// Take a user off the network-manager list.
    pub async fn remove_network_manager(&self, id: UserId) {
        self.state.write().await.network_managers.retain(|m| *m != id);
    }

    /// Current network-manager list.
    pub async fn network_managers(&self) -> Vec<UserId> {
        self.state.read().await.network_managers.clone()
    }

    /// Create a book site at `/{path}/`, replacing any site on the same path,
    /// and make it the current book.
    pub async fn create_book(&self, path: &str, title: impl Into<String>) -> BookId {
        let path = format!("/{}/", path.trim_matches('/'));
        let mut state = self.state.write().await;

        state.books.retain(|_, b| b.path != path);

        let id = BookId(state.next_book_id);
        state.next_book_id += 1;
        state.books.insert(
            id,
            FakeBook {
                id,
                path,
                title: title.into(),
            },
        );
        state.current_book = Some(id);
        id
    }

    /// Look up a book site.
    pub async fn book(&self, id: BookId) -> Option<FakeBook> {
        self.state.read().await.books.get(&id).cloned()
    }

    /// The most recently created book.
    pub async fn current_book(&self) -> Option<BookId> {
        self.state.read().await.current_book
    }
}

#[async_trait]
impl PlatformPermissions for FakePlatform {
    async fn is_restricted(&self, user_id: UserId) -> InstitutionResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .network_managers
            .contains(&user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_login_replaces_user() {
        let platform = FakePlatform::new();
        let first = platform
            .create_user("johndoe", "a@fake.test", "John", "Doe")
            .await;
        platform.grant_super_admin(first).await;

        let second = platform
            .create_user("johndoe", "b@fake.test", "John", "Doe")
            .await;

        assert_ne!(first, second);
        assert!(platform.user(first).await.is_none());
        assert!(!platform.is_super_admin(first).await);
        assert_eq!(
            platform.user_by_login("johndoe").await.unwrap().user_email,
            "b@fake.test"
        );
        assert_eq!(platform.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_network_managers_are_restricted() {
        let platform = FakePlatform::new();
        let admin = platform.create_user("admin", "admin@fake.test", "A", "D").await;
        platform.grant_super_admin(admin).await;
        assert!(!platform.is_restricted(admin).await.unwrap());

        platform.add_network_manager(admin).await;
        platform.add_network_manager(admin).await;
        assert!(platform.is_restricted(admin).await.unwrap());
        assert_eq!(platform.network_managers().await, vec![admin]);

        platform.remove_network_manager(admin).await;
        assert!(!platform.is_restricted(admin).await.unwrap());
    }

    #[tokio::test]
    async fn test_book_path_is_unique() {
        let platform = FakePlatform::new();
        let first = platform.create_book("fakepath", "Fake Book").await;
        let second = platform.create_book("/fakepath/", "Other").await;

        assert_eq!(first, BookId(2));
        assert!(platform.book(first).await.is_none());
        assert_eq!(platform.book(second).await.unwrap().path, "/fakepath/");
        assert_eq!(platform.current_book().await, Some(second));
    }
}
