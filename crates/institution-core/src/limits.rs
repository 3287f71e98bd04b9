//! Institution resource limits
//!
//! An institution caps how many users and books it may hold. Each cap is
//! either a concrete maximum or explicitly unlimited.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::InstitutionError;

/// A numeric quota, or no quota at all.
///
/// Serialized as `null` for unlimited and as a non-negative integer otherwise.
///
/// # Examples
///
/// ```
/// use institution_core::Limit;
///
/// let limit = Limit::Max(10);
/// assert!(limit.allows(9));
/// assert!(!limit.allows(10));
/// assert!(Limit::Unlimited.allows(u64::MAX));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Option<i64>", into = "Option<u32>")]
pub enum Limit {
    /// No cap
    Unlimited,

    /// At most this many
    Max(u32),
}

impl Limit {
    /// Whether one more item may be added when `current` already exist.
    pub fn allows(&self, current: u64) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Max(max) => current < u64::from(*max),
        }
    }

    /// How many more items fit, `None` when unlimited.
    pub fn remaining(&self, current: u64) -> Option<u64> {
        match self {
            Limit::Unlimited => None,
            Limit::Max(max) => Some(u64::from(*max).saturating_sub(current)),
        }
    }

    /// The cap, `None` when unlimited.
    pub fn as_option(&self) -> Option<u32> {
        match self {
            Limit::Unlimited => None,
            Limit::Max(max) => Some(*max),
        }
    }

    /// Parse a limit from text: a non-negative integer or `unlimited`.
    ///
    /// # Examples
    ///
    /// ```
    /// use institution_core::Limit;
    ///
    /// assert_eq!(Limit::parse("25"), Some(Limit::Max(25)));
    /// assert_eq!(Limit::parse("Unlimited"), Some(Limit::Unlimited));
    /// assert_eq!(Limit::parse("-1"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Some(Limit::Unlimited);
        }
        s.parse::<u32>().ok().map(Limit::Max)
    }
}

impl TryFrom<i64> for Limit {
    type Error = InstitutionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value).map(Limit::Max).map_err(|_| {
            InstitutionError::Validation(format!(
                "limit must be between 0 and {}, got {}",
                u32::MAX,
                value
            ))
        })
    }
}

impl TryFrom<Option<i64>> for Limit {
    type Error = InstitutionError;

    fn try_from(value: Option<i64>) -> Result<Self, Self::Error> {
        match value {
            None => Ok(Limit::Unlimited),
            Some(v) => Limit::try_from(v),
        }
    }
}

impl From<Option<u32>> for Limit {
    fn from(value: Option<u32>) -> Self {
        value.map(Limit::Max).unwrap_or(Limit::Unlimited)
    }
}

impl From<Limit> for Option<u32> {
    fn from(value: Limit) -> Self {
        value.as_option()
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unlimited => f.write_str("unlimited"),
            Limit::Max(max) => write!(f, "{}", max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_limit_rejected() {
        let err = Limit::try_from(-1i64).unwrap_err();
        assert!(matches!(err, InstitutionError::Validation(_)));
        assert_eq!(Limit::try_from(0i64).unwrap(), Limit::Max(0));
    }

    #[test]
    fn test_zero_limit_allows_nothing() {
        assert!(!Limit::Max(0).allows(0));
        assert_eq!(Limit::Max(0).remaining(0), Some(0));
    }

    #[test]
    fn test_remaining_saturates() {
        assert_eq!(Limit::Max(5).remaining(2), Some(3));
        assert_eq!(Limit::Max(5).remaining(8), Some(0));
        assert_eq!(Limit::Unlimited.remaining(8), None);
    }

    #[test]
    fn test_serde_null_is_unlimited() {
        assert_eq!(serde_json::to_string(&Limit::Unlimited).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Limit::Max(3)).unwrap(), "3");
        let parsed: Limit = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Limit::Unlimited);
        assert!(serde_json::from_str::<Limit>("-4").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Limit::Unlimited.to_string(), "unlimited");
        assert_eq!(Limit::Max(10).to_string(), "10");
    }
}
