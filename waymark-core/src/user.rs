use std::{fmt, str::FromStr};

/// Numeric user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse().map(Self)
    }
}

/// Public profile of a contributor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Display name.
    pub display_name: Option<String>,
    /// Account creation timestamp.
    pub account_created: Option<String>,
    /// Number of changesets the user has uploaded.
    pub changesets_count: u64,
    /// Avatar URL, when the user has one.
    pub image_url: Option<String>,
}

impl User {
    /// A user known only by id.
    #[must_use]
    pub const fn new(id: UserId) -> Self {
        Self {
            id,
            display_name: None,
            account_created: None,
            changesets_count: 0,
            image_url: None,
        }
    }
}
