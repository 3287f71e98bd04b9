//! Identifier newtypes
//!
//! Users and books are owned by the host platform, so their identifiers are
//! plain numeric references. Institution identifiers are assigned by the
//! stores in this crate starting at 1.
//!
//! Stores keep identifiers in signed 64-bit columns, so every store rejects
//! raw values above [`MAX_ID`] with [`InstitutionError::Validation`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{InstitutionError, InstitutionResult};

/// Largest identifier any store accepts.
pub const MAX_ID: u64 = i64::MAX as u64;

fn check_range(kind: &'static str, raw: u64) -> InstitutionResult<()> {
    if raw > MAX_ID {
        return Err(InstitutionError::Validation(format!(
            "{} id {} is out of range (max {})",
            kind, raw, MAX_ID
        )));
    }
    Ok(())
}

/// Identifier of an institution.
///
/// The value `0` is reserved as [`InstitutionId::UNSCOPED`] and is never
/// assigned to a stored institution.
///
/// # Examples
///
/// ```
/// use institution_core::InstitutionId;
///
/// assert!(InstitutionId::UNSCOPED.is_unscoped());
/// assert_eq!(InstitutionId::UNSCOPED.as_option(), None);
/// assert_eq!(InstitutionId::new(4).as_option(), Some(InstitutionId::new(4)));
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InstitutionId(pub u64);

impl InstitutionId {
    /// "No institution": the caller is global or unscoped.
    pub const UNSCOPED: InstitutionId = InstitutionId(0);

    /// Wrap a raw identifier.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the unscoped sentinel.
    pub const fn is_unscoped(self) -> bool {
        self.0 == 0
    }

    /// `self` if a store can hold it, `Validation` otherwise.
    pub fn checked(self) -> InstitutionResult<Self> {
        check_range("institution", self.0).map(|_| self)
    }

    /// `None` for the unscoped sentinel, `Some(self)` otherwise.
    pub fn as_option(self) -> Option<InstitutionId> {
        if self.is_unscoped() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<Option<InstitutionId>> for InstitutionId {
    fn from(value: Option<InstitutionId>) -> Self {
        value.unwrap_or(InstitutionId::UNSCOPED)
    }
}

impl fmt::Display for InstitutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a host platform user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// `self` if a store can hold it, `Validation` otherwise.
    pub fn checked(self) -> InstitutionResult<Self> {
        check_range("user", self.0).map(|_| self)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a book (a site on the host platform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(pub u64);

impl BookId {
    /// `self` if a store can hold it, `Validation` otherwise.
    pub fn checked(self) -> InstitutionResult<Self> {
        check_range("book", self.0).map(|_| self)
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscoped_sentinel() {
        assert_eq!(InstitutionId::UNSCOPED.get(), 0);
        assert_eq!(InstitutionId::default(), InstitutionId::UNSCOPED);
        assert!(!InstitutionId::new(1).is_unscoped());
    }

    #[test]
    fn test_from_option() {
        assert_eq!(InstitutionId::from(None), InstitutionId::UNSCOPED);
        assert_eq!(
            InstitutionId::from(Some(InstitutionId::new(9))),
            InstitutionId::new(9)
        );
    }

    #[test]
    fn test_checked_range() {
        assert_eq!(UserId(MAX_ID).checked().unwrap(), UserId(MAX_ID));
        assert!(matches!(
            UserId(MAX_ID + 1).checked(),
            Err(InstitutionError::Validation(_))
        ));
        assert!(BookId(u64::MAX).checked().is_err());
        assert!(InstitutionId::new(u64::MAX).checked().is_err());
        assert!(InstitutionId::UNSCOPED.checked().is_ok());
    }

    #[test]
    fn test_serializes_as_number() {
        let json = serde_json::to_string(&InstitutionId::new(12)).unwrap();
        assert_eq!(json, "12");
        let user: UserId = serde_json::from_str("42").unwrap();
        assert_eq!(user, UserId(42));
    }
}
