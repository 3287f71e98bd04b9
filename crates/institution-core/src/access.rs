//! Manager scoping for restricted users
//!
//! Full administrators see the whole network. Restricted users (network
//! managers whose access has been limited) only see the institution they
//! manage. The resolver answers "which institution is this user scoped to?"
//! and normalizes "none" to [`InstitutionId::UNSCOPED`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::InstitutionResult;
use crate::ids::{InstitutionId, UserId};
use crate::store::MembershipStore;

/// The host platform's permission system.
#[async_trait]
pub trait PlatformPermissions: Send + Sync {
    /// Whether the user is restricted, i.e. not a full administrator.
    async fn is_restricted(&self, user_id: UserId) -> InstitutionResult<bool>;
}

/// Platform state for one request, passed explicitly to the resolver.
///
/// # Examples
///
/// ```
/// use institution_core::{AccessContext, UserId};
///
/// let ctx = AccessContext::restricted(UserId(42));
/// assert!(ctx.restricted);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    /// The requesting user
    pub user_id: UserId,

    /// Whether the platform reports the user as restricted
    pub restricted: bool,
}

impl AccessContext {
    /// Context for a restricted user.
    pub fn restricted(user_id: UserId) -> Self {
        Self {
            user_id,
            restricted: true,
        }
    }

    /// Context for a full administrator or any other unrestricted user.
    pub fn unrestricted(user_id: UserId) -> Self {
        Self {
            user_id,
            restricted: false,
        }
    }

    /// Build the context by asking the platform about `user_id`.
    pub async fn from_platform(
        user_id: UserId,
        platform: &dyn PlatformPermissions,
    ) -> InstitutionResult<Self> {
        Ok(Self {
            user_id,
            restricted: platform.is_restricted(user_id).await?,
        })
    }
}

/// Explicit form of the resolver's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "institution_id", rename_all = "snake_case")]
pub enum InstitutionScope {
    /// Global view, no institution filter
    Unscoped,

    /// Visibility limited to this institution
    Institution(InstitutionId),
}

impl InstitutionScope {
    /// The sentinel form: `0` for unscoped.
    pub fn institution_id(&self) -> InstitutionId {
        match self {
            InstitutionScope::Unscoped => InstitutionId::UNSCOPED,
            InstitutionScope::Institution(id) => *id,
        }
    }
}

impl From<InstitutionId> for InstitutionScope {
    fn from(id: InstitutionId) -> Self {
        match id.as_option() {
            Some(id) => InstitutionScope::Institution(id),
            None => InstitutionScope::Unscoped,
        }
    }
}

/// Resolves the institution a user manages.
#[derive(Clone)]
pub struct AccessResolver {
    memberships: Arc<dyn MembershipStore>,
}

impl std::fmt::Debug for AccessResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessResolver").finish_non_exhaustive()
    }
}

impl AccessResolver {
    /// Create a resolver over a membership store.
    pub fn new(memberships: Arc<dyn MembershipStore>) -> Self {
        Self { memberships }
    }

    /// The institution the user manages, or [`InstitutionId::UNSCOPED`].
    ///
    /// Unrestricted users are always unscoped, whatever their memberships.
    /// A restricted user without a manager membership is also unscoped.
    /// Only store failures produce an error.
    pub async fn resolve_managed_institution(
        &self,
        ctx: &AccessContext,
    ) -> InstitutionResult<InstitutionId> {
        if !ctx.restricted {
            tracing::debug!(user_id = %ctx.user_id, "Unrestricted user is unscoped");
            return Ok(InstitutionId::UNSCOPED);
        }

        let managed = self
            .memberships
            .find_managed_institution(ctx.user_id)
            .await?;
        tracing::debug!(
            user_id = %ctx.user_id,
            institution_id = ?managed,
            "Resolved managed institution"
        );
        Ok(InstitutionId::from(managed))
    }

    /// Same as [`resolve_managed_institution`](Self::resolve_managed_institution)
    /// as an [`InstitutionScope`].
    pub async fn resolve_scope(&self, ctx: &AccessContext) -> InstitutionResult<InstitutionScope> {
        self.resolve_managed_institution(ctx)
            .await
            .map(InstitutionScope::from)
    }

    /// Ask the platform for the restriction flag, then resolve.
    pub async fn resolve_for_user(
        &self,
        user_id: UserId,
        platform: &dyn PlatformPermissions,
    ) -> InstitutionResult<InstitutionId> {
        let ctx = AccessContext::from_platform(user_id, platform).await?;
        self.resolve_managed_institution(&ctx).await
    }
}
