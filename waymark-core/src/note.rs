//! Map notes: point-located discussion threads.

use std::{fmt, str::FromStr};

use geo::Coord;

use crate::UserId;

/// Numeric note identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoteId(pub u64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = std::num::ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.trim().parse().map(Self)
    }
}

/// Whether a note is still awaiting resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum NoteStatus {
    /// Awaiting resolution.
    Open,
    /// Resolved; may be reopened.
    Closed,
}

impl NoteStatus {
    /// Parse the textual status reported by the API. Anything other than
    /// `closed` is treated as open.
    #[must_use]
    pub fn from_api(value: &str) -> Self {
        if value.trim() == "closed" {
            Self::Closed
        } else {
            Self::Open
        }
    }

    /// Path segment of the action that flips this status.
    #[must_use]
    pub const fn toggle_action(self) -> &'static str {
        match self {
            Self::Open => "close",
            Self::Closed => "reopen",
        }
    }
}

/// A single entry in a note's discussion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoteComment {
    /// Author id; absent for anonymous comments.
    pub uid: Option<UserId>,
    /// Author display name.
    pub user: Option<String>,
    /// Timestamp as reported by the API.
    pub date: Option<String>,
    /// Plain-text body.
    pub text: String,
    /// Action that accompanied the comment (`opened`, `commented`, `closed`, ...).
    pub action: String,
}

/// A point-located discussion thread.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Note {
    /// Note identifier.
    pub id: NoteId,
    /// Position, possibly nudged away from a coincident note.
    pub location: Coord<f64>,
    /// Open or closed.
    pub status: NoteStatus,
    /// Creation timestamp.
    pub date_created: Option<String>,
    /// Closing timestamp, when closed.
    pub date_closed: Option<String>,
    /// Discussion in chronological order.
    pub comments: Vec<NoteComment>,
}

impl Note {
    /// Construct an open note without comments.
    #[must_use]
    pub const fn new(id: NoteId, location: Coord<f64>) -> Self {
        Self {
            id,
            location,
            status: NoteStatus::Open,
            date_created: None,
            date_closed: None,
            comments: Vec::new(),
        }
    }

    /// Authors referenced by the discussion, in order of first appearance.
    #[must_use]
    pub fn comment_authors(&self) -> Vec<UserId> {
        let mut authors = Vec::new();
        for uid in self.comments.iter().filter_map(|comment| comment.uid) {
            if !authors.contains(&uid) {
                authors.push(uid);
            }
        }
        authors
    }
}
