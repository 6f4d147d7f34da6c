//! Changesets and the edits uploaded through them.

use std::fmt;

use crate::{Entity, Tags};

/// Server-assigned changeset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangesetId(pub u64);

impl fmt::Display for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A transaction grouping a batch of edits.
///
/// The identifier stays `None` until the server opens the changeset. Opening
/// produces a new value via [`Changeset::with_id`]; the original is left
/// untouched so a failed upload can hand it back unchanged.
///
/// # Examples
/// ```
/// use waymark_core::{Changeset, ChangesetId, Tags};
///
/// let draft = Changeset::new(Tags::from([("comment".into(), "Fix typo".into())]));
/// let opened = draft.with_id(ChangesetId(99));
/// assert_eq!(draft.id, None);
/// assert_eq!(opened.id, Some(ChangesetId(99)));
/// assert_eq!(opened.comment(), Some("Fix typo"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Changeset {
    /// Identifier assigned by the server.
    pub id: Option<ChangesetId>,
    /// Changeset tags (`comment`, `created_by`, ...).
    pub tags: Tags,
}

impl Changeset {
    /// A changeset that has not been opened yet.
    #[must_use]
    pub const fn new(tags: Tags) -> Self {
        Self { id: None, tags }
    }

    /// Copy of this changeset carrying the server-assigned id.
    #[must_use]
    pub fn with_id(&self, id: ChangesetId) -> Self {
        Self {
            id: Some(id),
            tags: self.tags.clone(),
        }
    }

    /// The `comment` tag, when present and non-empty.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.tags
            .get("comment")
            .map(String::as_str)
            .filter(|comment| !comment.is_empty())
    }
}

/// Set of edits uploaded in a single diff.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OsmChange {
    /// Entities that do not exist on the server yet.
    pub created: Vec<Entity>,
    /// Entities whose new state replaces the server copy.
    pub modified: Vec<Entity>,
    /// Entities to remove.
    pub deleted: Vec<Entity>,
}

impl OsmChange {
    /// Whether the diff carries no edits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}
