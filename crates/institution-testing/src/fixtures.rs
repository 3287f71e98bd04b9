//! Model builders for tests
//!
//! A [`Fixtures`] value owns a fresh store and a fresh [`FakePlatform`].
//! Creating it is the setup and dropping it is the teardown, so tests never
//! see each other's rows.

use rand::seq::SliceRandom;
use std::sync::Arc;

use institution_core::store::memory::MemoryStore;
use institution_core::store::sqlite::SqliteStore;
use institution_core::{
    AccessContext, BookId, DeletePolicy, Institution, InstitutionError, InstitutionResult,
    InstitutionService, Limit, NewInstitution, UserId,
};

use crate::platform::FakePlatform;

/// Properties for [`Fixtures::new_user`]. Unset fields take the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProperties {
    /// Given name (default `John`)
    pub first_name: String,
    /// Family name (default `Doe`)
    pub last_name: String,
    /// Login (default `johndoe`)
    pub user_login: String,
    /// Email (default `johndoe@fakedomain.edu`)
    pub user_email: String,
}

impl Default for UserProperties {
    fn default() -> Self {
        Self {
            first_name: "John".to_string(),
            last_name: "Doe".to_string(),
            user_login: "johndoe".to_string(),
            user_email: "johndoe@fakedomain.edu".to_string(),
        }
    }
}

impl UserProperties {
    /// Defaults with a different login and email.
    pub fn login(user_login: impl Into<String>, user_email: impl Into<String>) -> Self {
        Self {
            user_login: user_login.into(),
            user_email: user_email.into(),
            ..Self::default()
        }
    }
}

/// Properties for [`Fixtures::new_book`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookProperties {
    /// Site path slug (default `fakepath`)
    pub path: String,
    /// Title (default `Fake Book`)
    pub title: String,
}

impl Default for BookProperties {
    fn default() -> Self {
        Self {
            path: "fakepath".to_string(),
            title: "Fake Book".to_string(),
        }
    }
}

/// Properties for [`Fixtures::create_institution`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstitutionProperties {
    /// Name (default `Fake Institution`)
    pub name: String,
    /// Book limit (default 10)
    pub book_limit: Limit,
    /// User limit (default 10)
    pub user_limit: Limit,
}

impl Default for InstitutionProperties {
    fn default() -> Self {
        Self {
            name: "Fake Institution".to_string(),
            book_limit: Limit::Max(10),
            user_limit: Limit::Max(10),
        }
    }
}

impl InstitutionProperties {
    /// Defaults with a different name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Fixture builder over an isolated store and platform.
#[derive(Debug, Clone)]
pub struct Fixtures {
    platform: Arc<FakePlatform>,
    service: InstitutionService,
}

impl Default for Fixtures {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixtures {
    /// Fixtures over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_service(InstitutionService::new(MemoryStore::new()))
    }

    /// Fixtures over a fresh in-memory SQLite database.
    pub fn sqlite(policy: DeletePolicy) -> InstitutionResult<Self> {
        Ok(Self::with_service(InstitutionService::new(
            SqliteStore::open_in_memory(policy)?,
        )))
    }

    /// Fixtures over an existing service.
    pub fn with_service(service: InstitutionService) -> Self {
        Self {
            platform: Arc::new(FakePlatform::new()),
            service,
        }
    }

    /// The fake host platform.
    pub fn platform(&self) -> &FakePlatform {
        &self.platform
    }

    /// Shared handle to the fake host platform.
    pub fn platform_handle(&self) -> Arc<FakePlatform> {
        self.platform.clone()
    }

    /// The institution service under test.
    pub fn service(&self) -> &InstitutionService {
        &self.service
    }

    /// Create a platform user, replacing any user with the same login.
    pub async fn new_user(&self, properties: UserProperties) -> UserId {
        self.platform
            .create_user(
                properties.user_login,
                properties.user_email,
                properties.first_name,
                properties.last_name,
            )
            .await
    }

    /// Create a user with network-wide super admin.
    pub async fn new_super_admin(&self, properties: UserProperties) -> UserId {
        let id = self.new_user(properties).await;
        self.platform.grant_super_admin(id).await;
        id
    }

    /// Create a super admin on the network-manager list, i.e. a restricted
    /// administrator.
    pub async fn new_network_manager(&self, properties: UserProperties) -> UserId {
        let id = self.new_super_admin(properties).await;
        self.platform.add_network_manager(id).await;
        id
    }

    /// Create a network manager who manages `institution`.
    pub async fn new_institutional_manager(
        &self,
        institution: &Institution,
        properties: UserProperties,
    ) -> InstitutionResult<UserId> {
        let id = self.new_network_manager(properties).await;
        self.service
            .memberships()
            .attach(id, institution.id, true)
            .await?;
        Ok(id)
    }

    /// Create a book site, replacing any site on the same path. The new book
    /// becomes the platform's current book.
    pub async fn new_book(&self, properties: BookProperties) -> BookId {
        self.platform
            .create_book(&properties.path, properties.title)
            .await
    }

    /// Create an institution.
    pub async fn create_institution(
        &self,
        properties: InstitutionProperties,
    ) -> InstitutionResult<Institution> {
        self.service
            .institutions()
            .create(NewInstitution::new(
                properties.name,
                properties.book_limit,
                properties.user_limit,
            ))
            .await
    }

    /// Create `institutions` institutions named `Institution {i}` and
    /// `users` users (`johndoe{i}`, `j{i}@fake.test`). Each user is attached
    /// to a randomly chosen institution.
    ///
    /// Asking for users without any institution is a validation error.
    pub async fn create_institutions_users(
        &self,
        institutions: usize,
        users: usize,
    ) -> InstitutionResult<Vec<Institution>> {
        if institutions == 0 && users > 0 {
            return Err(InstitutionError::Validation(
                "cannot distribute users over zero institutions".to_string(),
            ));
        }

        let mut created = Vec::with_capacity(institutions);
        for i in 0..institutions {
            created.push(
                self.create_institution(InstitutionProperties::named(format!(
                    "Institution {}",
                    i
                )))
                .await?,
            );
        }

        for i in 0..users {
            let user_id = self
                .new_user(UserProperties {
                    first_name: format!("John{}", i),
                    last_name: format!("Doe{}", i),
                    user_login: format!("johndoe{}", i),
                    user_email: format!("j{}@fake.test", i),
                })
                .await;
            let target = created
                .choose(&mut rand::thread_rng())
                .map(|institution| institution.id)
                .ok_or_else(|| {
                    InstitutionError::Validation("no institution to attach users to".to_string())
                })?;
            self.service
                .memberships()
                .attach(user_id, target, false)
                .await?;
        }

        tracing::debug!(institutions, users, "Created institution fixtures");
        Ok(created)
    }

    /// Build the access context the platform reports for `user_id`.
    pub async fn access_context(&self, user_id: UserId) -> InstitutionResult<AccessContext> {
        AccessContext::from_platform(user_id, self.platform.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_institution_properties() {
        let fixtures = Fixtures::new();
        let institution = fixtures
            .create_institution(InstitutionProperties::default())
            .await
            .unwrap();

        assert_eq!(institution.name, "Fake Institution");
        assert_eq!(institution.book_limit, Limit::Max(10));
        assert_eq!(institution.user_limit, Limit::Max(10));
    }

    #[tokio::test]
    async fn test_role_ladder() {
        let fixtures = Fixtures::new();

        let user = fixtures.new_user(UserProperties::login("u", "u@fake.test")).await;
        let admin = fixtures
            .new_super_admin(UserProperties::login("a", "a@fake.test"))
            .await;
        let manager = fixtures
            .new_network_manager(UserProperties::login("m", "m@fake.test"))
            .await;

        assert!(!fixtures.access_context(user).await.unwrap().restricted);
        assert!(!fixtures.access_context(admin).await.unwrap().restricted);
        assert!(fixtures.platform().is_super_admin(manager).await);
        assert!(fixtures.access_context(manager).await.unwrap().restricted);
    }

    #[tokio::test]
    async fn test_new_book_defaults() {
        let fixtures = Fixtures::new();
        let book = fixtures.new_book(BookProperties::default()).await;

        let site = fixtures.platform().book(book).await.unwrap();
        assert_eq!(site.path, "/fakepath/");
        assert_eq!(site.title, "Fake Book");
        assert_eq!(fixtures.platform().current_book().await, Some(book));
    }

    #[tokio::test]
    async fn test_bulk_users_reach_every_institution() {
        let fixtures = Fixtures::new();
        let institutions = fixtures.create_institutions_users(3, 90).await.unwrap();

        let mut total = 0;
        for institution in &institutions {
            let members = fixtures
                .service()
                .memberships()
                .count_by_institution(institution.id)
                .await
                .unwrap();
            assert!(members > 0, "{} got no users", institution.name);
            total += members;
        }
        assert_eq!(total, 90);
    }

    #[tokio::test]
    async fn test_single_institution_takes_every_user() {
        let fixtures = Fixtures::new();
        let institutions = fixtures.create_institutions_users(1, 5).await.unwrap();
        let members = fixtures
            .service()
            .memberships()
            .count_by_institution(institutions[0].id)
            .await
            .unwrap();
        assert_eq!(members, 5);
    }

    #[tokio::test]
    async fn test_users_without_institutions_rejected() {
        let fixtures = Fixtures::new();
        let err = fixtures.create_institutions_users(0, 3).await.unwrap_err();
        assert!(matches!(err, InstitutionError::Validation(_)));
        assert!(fixtures.create_institutions_users(0, 0).await.unwrap().is_empty());
    }
}
