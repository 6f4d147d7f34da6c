//! Map features: nodes, ways and relations.
//!
//! Entities are immutable once decoded. Edits produce new instances through
//! the `with_*` helpers so cached copies are never mutated in place.

use std::{collections::HashMap, fmt, str::FromStr};

use geo::Coord;
use thiserror::Error;

/// Free-form key/value tags attached to entities and changesets.
pub type Tags = HashMap<String, String>;

/// The three kinds of map feature exposed by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EntityKind {
    /// A single point.
    Node,
    /// An ordered list of node references.
    Way,
    /// An ordered list of typed, role-annotated members.
    Relation,
}

impl EntityKind {
    /// Element name used by the API for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }

    /// Single-character prefix used in composite identifiers.
    #[must_use]
    pub const fn prefix(self) -> char {
        match self {
            Self::Node => 'n',
            Self::Way => 'w',
            Self::Relation => 'r',
        }
    }

    /// Resolve a kind from its element name (`node`, `way`, `relation`).
    #[must_use]
    pub fn from_element_name(name: &str) -> Option<Self> {
        match name {
            "node" => Some(Self::Node),
            "way" => Some(Self::Way),
            "relation" => Some(Self::Relation),
            _ => None,
        }
    }

    const fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            'n' => Some(Self::Node),
            'w' => Some(Self::Way),
            'r' => Some(Self::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-prefixed entity identifier such as `n123` or `w-4`.
///
/// The prefix makes the identifier unique across kinds: the same numeric id
/// may be used by a node and a way, but `n1` and `w1` never collide.
///
/// # Examples
/// ```
/// use waymark_core::{EntityId, EntityKind};
///
/// let id: EntityId = "w42".parse()?;
/// assert_eq!(id.kind(), EntityKind::Way);
/// assert_eq!(id.osm_id(), 42);
/// assert_eq!(id.to_string(), "w42");
/// # Ok::<(), waymark_core::EntityIdError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityId {
    kind: EntityKind,
    osm_id: i64,
}

impl EntityId {
    /// Build an identifier from its kind and numeric API id.
    #[must_use]
    pub const fn new(kind: EntityKind, osm_id: i64) -> Self {
        Self { kind, osm_id }
    }

    /// Shorthand for a node identifier.
    #[must_use]
    pub const fn node(osm_id: i64) -> Self {
        Self::new(EntityKind::Node, osm_id)
    }

    /// Shorthand for a way identifier.
    #[must_use]
    pub const fn way(osm_id: i64) -> Self {
        Self::new(EntityKind::Way, osm_id)
    }

    /// Shorthand for a relation identifier.
    #[must_use]
    pub const fn relation(osm_id: i64) -> Self {
        Self::new(EntityKind::Relation, osm_id)
    }

    /// Kind encoded in the prefix.
    #[must_use]
    pub const fn kind(self) -> EntityKind {
        self.kind
    }

    /// Numeric identifier as used in API paths.
    ///
    /// Negative values denote entities created locally that the server has
    /// not yet assigned an identifier to.
    #[must_use]
    pub const fn osm_id(self) -> i64 {
        self.osm_id
    }

    /// Whether the entity only exists locally.
    #[must_use]
    pub const fn is_new(self) -> bool {
        self.osm_id < 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.osm_id)
    }
}

/// Errors returned when parsing an [`EntityId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityIdError {
    /// The prefix was not one of `n`, `w`, or `r`.
    #[error("unknown entity prefix in {0:?}")]
    UnknownPrefix(String),
    /// The numeric part did not parse.
    #[error("invalid numeric entity id in {0:?}")]
    InvalidNumber(String),
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut chars = value.chars();
        let kind = chars
            .next()
            .and_then(EntityKind::from_prefix)
            .ok_or_else(|| EntityIdError::UnknownPrefix(value.to_owned()))?;
        let osm_id = chars
            .as_str()
            .parse()
            .map_err(|_| EntityIdError::InvalidNumber(value.to_owned()))?;
        Ok(Self::new(kind, osm_id))
    }
}

/// Attributes shared by every entity kind.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityMeta {
    /// Composite identifier.
    pub id: EntityId,
    /// Server version; absent for locally created entities.
    pub version: Option<u64>,
    /// `false` for deleted entities returned by history calls.
    pub visible: bool,
    /// Changeset that produced this version.
    pub changeset: Option<u64>,
    /// ISO-8601 timestamp of this version.
    pub timestamp: Option<String>,
    /// Display name of the last author.
    pub user: Option<String>,
    /// Numeric id of the last author.
    pub uid: Option<u64>,
    /// Free-form tags.
    pub tags: Tags,
}

impl EntityMeta {
    /// Metadata for a locally created entity with no server history.
    #[must_use]
    pub fn new(id: EntityId, tags: Tags) -> Self {
        Self {
            id,
            version: None,
            visible: true,
            changeset: None,
            timestamp: None,
            user: None,
            uid: None,
            tags,
        }
    }
}

/// A point feature.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    /// Shared attributes.
    pub meta: EntityMeta,
    /// WGS84 position (`x = longitude`, `y = latitude`).
    pub location: Coord<f64>,
}

/// A polyline or polygon described by node references.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Way {
    /// Shared attributes.
    pub meta: EntityMeta,
    /// Ordered node references.
    pub nodes: Vec<EntityId>,
}

/// One member of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Member {
    /// Referenced entity.
    pub id: EntityId,
    /// Kind of the referenced entity.
    pub kind: EntityKind,
    /// Role of the member inside the relation; often empty.
    pub role: String,
}

/// A grouping of other entities.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Relation {
    /// Shared attributes.
    pub meta: EntityMeta,
    /// Ordered members.
    pub members: Vec<Member>,
}

/// A decoded map feature, dispatched by kind.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "lowercase"))]
pub enum Entity {
    /// See [`Node`].
    Node(Node),
    /// See [`Way`].
    Way(Way),
    /// See [`Relation`].
    Relation(Relation),
}

impl Entity {
    /// Shared attributes of the entity.
    #[must_use]
    pub const fn meta(&self) -> &EntityMeta {
        match self {
            Self::Node(node) => &node.meta,
            Self::Way(way) => &way.meta,
            Self::Relation(relation) => &relation.meta,
        }
    }

    /// Composite identifier of the entity.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.meta().id
    }

    /// Kind of the entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Node(_) => EntityKind::Node,
            Self::Way(_) => EntityKind::Way,
            Self::Relation(_) => EntityKind::Relation,
        }
    }

    /// Tags of the entity.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        &self.meta().tags
    }

    /// Return a copy of this entity carrying `tags` instead of the current ones.
    ///
    /// # Examples
    /// ```
    /// use geo::Coord;
    /// use waymark_core::{Entity, EntityId, EntityMeta, Node, Tags};
    ///
    /// let node = Entity::Node(Node {
    ///     meta: EntityMeta::new(EntityId::node(-1), Tags::new()),
    ///     location: Coord { x: 0.0, y: 0.0 },
    /// });
    /// let tagged = node.with_tags(Tags::from([("amenity".into(), "bench".into())]));
    /// assert!(node.tags().is_empty());
    /// assert_eq!(tagged.tags().get("amenity").map(String::as_str), Some("bench"));
    /// ```
    #[must_use]
    pub fn with_tags(&self, tags: Tags) -> Self {
        let mut updated = self.clone();
        match &mut updated {
            Self::Node(node) => node.meta.tags = tags,
            Self::Way(way) => way.meta.tags = tags,
            Self::Relation(relation) => relation.meta.tags = tags,
        }
        updated
    }
}

impl Node {
    /// Return a copy of this node placed at `location`.
    #[must_use]
    pub fn moved_to(&self, location: Coord<f64>) -> Self {
        Self {
            meta: self.meta.clone(),
            location,
        }
    }
}
