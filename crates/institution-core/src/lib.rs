//! # Institution Management
//!
//! This crate adds institutions to the multi-institution publishing platform:
//! tenant groupings of users and books with shared limits and designated
//! managers.
//!
//! ## Overview
//!
//! The institution-core crate handles:
//! - **Institutions**: Named tenants with book and user limits
//! - **Memberships**: User-institution links with a manager flag
//! - **Books**: Book-institution assignments and the book registry
//! - **Quotas**: Usage evaluation against configured limits
//! - **Access**: Scoping restricted users to the institution they manage
//!
//! ## Architecture
//!
//! ```text
//! User
//!   ├─ InstitutionUser (manager?) ─→ Institution
//!   │                                  ├─ book_limit / user_limit
//!   │                                  └─ BookAssignment ←─ Book
//!   └─ AccessContext (restricted?) ─→ AccessResolver ─→ InstitutionId | UNSCOPED
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use institution_core::{AccessContext, InstitutionService, Limit, NewInstitution, UserId};
//! use institution_core::store::memory::MemoryStore;
//!
//! # async fn run() -> institution_core::InstitutionResult<()> {
//! let service = InstitutionService::new(MemoryStore::new());
//!
//! let (acme, _) = service
//!     .create_institution_with_manager(
//!         NewInstitution::new("Acme", Limit::Max(10), Limit::Max(10)),
//!         UserId(42),
//!     )
//!     .await?;
//!
//! let scoped = service
//!     .access()
//!     .resolve_managed_institution(&AccessContext::restricted(UserId(42)))
//!     .await?;
//! assert_eq!(scoped, acme.id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `memory` (default): In-memory store
//! - `sqlite` (default): SQLite store via `rusqlite`

pub mod access;
pub mod config;
pub mod error;
pub mod ids;
pub mod institution;
pub mod limits;
pub mod membership;
pub mod quota;
pub mod service;
pub mod store;

// Re-export main types for convenience
pub use access::{AccessContext, AccessResolver, InstitutionScope, PlatformPermissions};
pub use config::{ConfigError, DeletePolicy, InstitutionConfig};
pub use error::{InstitutionError, InstitutionResult};
pub use ids::{BookId, InstitutionId, UserId};
pub use institution::{Institution, InstitutionSummary, InstitutionUpdate, NewInstitution};
pub use limits::Limit;
pub use membership::{BookAssignment, InstitutionUser};
pub use quota::{QuotaEvaluator, QuotaUsage};
pub use service::InstitutionService;
pub use store::{BookAssignments, BookRegistry, InstitutionStore, MembershipStore, Store};
