//! # Institution Test Fixtures
//!
//! Test-only infrastructure for `institution-core`:
//!
//! - [`FakePlatform`]: an in-memory stand-in for the host platform's users,
//!   super admins, network managers and book sites. It implements
//!   [`PlatformPermissions`](institution_core::PlatformPermissions).
//! - [`Fixtures`]: builders for users, administrators, institutional managers,
//!   books and institutions over an isolated store.
//! - [`services`]: one service per store backend, for tests that must hold
//!   on every backend.
//!
//! ```rust,no_run
//! use institution_testing::{Fixtures, InstitutionProperties, UserProperties};
//!
//! # async fn run() -> institution_core::InstitutionResult<()> {
//! let fixtures = Fixtures::new();
//! let institution = fixtures.create_institution(InstitutionProperties::default()).await?;
//! let manager = fixtures
//!     .new_institutional_manager(&institution, UserProperties::default())
//!     .await?;
//!
//! let ctx = fixtures.access_context(manager).await?;
//! let scoped = fixtures.service().access().resolve_managed_institution(&ctx).await?;
//! assert_eq!(scoped, institution.id);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod platform;

pub use fixtures::{BookProperties, Fixtures, InstitutionProperties, UserProperties};
pub use platform::{FakeBook, FakePlatform, FakeUser};

use institution_core::store::memory::MemoryStore;
use institution_core::store::sqlite::SqliteStore;
use institution_core::{DeletePolicy, InstitutionResult, InstitutionService};

/// A fresh service per store backend, labelled for assertion messages.
pub fn services(policy: DeletePolicy) -> InstitutionResult<Vec<(&'static str, InstitutionService)>> {
    Ok(vec![
        (
            "memory",
            InstitutionService::new(MemoryStore::with_policy(policy)),
        ),
        (
            "sqlite",
            InstitutionService::new(SqliteStore::open_in_memory(policy)?),
        ),
    ])
}
