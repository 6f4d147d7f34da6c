//! Element decoders for API responses.
//!
//! These functions are pure: each turns one [`Element`] into a domain record.
//! Deduplication, note placement and the user pending-set bookkeeping happen
//! in the session, which owns the caches those steps consult.

use std::rc::Rc;

use geo::Coord;
use waymark_core::{
    Changeset, ChangesetId, Entity, EntityId, EntityKind, EntityMeta, Member, Node, Note,
    NoteComment, NoteId, NoteStatus, Relation, Tags, User, UserId, Way,
};

use crate::document::Element;

/// A decoded top-level response element.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A node, way or relation.
    Entity(Entity),
    /// A note, as stored in the session's note cache.
    Note(Rc<Note>),
    /// A user profile.
    User(User),
}

impl Record {
    /// The entity, when this record is one.
    #[must_use]
    pub fn into_entity(self) -> Option<Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// The user, when this record is one.
    #[must_use]
    pub fn into_user(self) -> Option<User> {
        match self {
            Self::User(user) => Some(user),
            _ => None,
        }
    }

    /// The note, when this record is one.
    #[must_use]
    pub fn into_note(self) -> Option<Rc<Note>> {
        match self {
            Self::Note(note) => Some(note),
            _ => None,
        }
    }
}

/// Deduplication policy for a decode pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Skip entities already decoded this session and users already cached.
    pub skip_seen: bool,
}

impl DecodeOptions {
    /// Skip anything already seen.
    pub const SKIP_SEEN: Self = Self { skip_seen: true };
    /// Decode everything.
    pub const DECODE_ALL: Self = Self { skip_seen: false };
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::SKIP_SEEN
    }
}

/// Kind of record an element name maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementKind {
    Entity(EntityKind),
    Note,
    User,
}

impl ElementKind {
    /// Resolve an element name; unknown names yield `None`.
    pub(crate) fn classify(name: &str) -> Option<Self> {
        match name {
            "note" => Some(Self::Note),
            "user" => Some(Self::User),
            other => EntityKind::from_element_name(other).map(Self::Entity),
        }
    }
}

/// Identifier of an entity element.
pub(crate) fn entity_id(kind: EntityKind, element: &Element) -> Option<EntityId> {
    element
        .attr_parsed::<i64>("id")
        .map(|osm_id| EntityId::new(kind, osm_id))
}

/// Identifier of a note element, taken from its `id` child.
pub(crate) fn note_id(element: &Element) -> Option<NoteId> {
    element.child_text("id").and_then(|id| id.parse().ok())
}

/// Identifier of a user element.
pub(crate) fn user_id(element: &Element) -> Option<UserId> {
    element.attr_parsed::<u64>("id").map(UserId)
}

fn tags(element: &Element) -> Tags {
    element
        .children_named("tag")
        .filter_map(|tag| Some((tag.attr("k")?.to_owned(), tag.attr("v")?.to_owned())))
        .collect()
}

fn meta(id: EntityId, element: &Element) -> EntityMeta {
    EntityMeta {
        id,
        version: element.attr_parsed("version"),
        visible: element.attr("visible") != Some("false"),
        changeset: element.attr_parsed("changeset"),
        timestamp: element.attr("timestamp").map(str::to_owned),
        user: element.attr("user").map(str::to_owned),
        uid: element.attr_parsed("uid"),
        tags: tags(element),
    }
}

/// Decode a node, way or relation element.
///
/// Deleted nodes returned by history reads carry no position; their location
/// is NaN on both axes.
#[must_use]
pub fn decode_entity(id: EntityId, element: &Element) -> Entity {
    let meta = meta(id, element);
    match id.kind() {
        EntityKind::Node => Entity::Node(Node {
            meta,
            location: location(element).unwrap_or(Coord {
                x: f64::NAN,
                y: f64::NAN,
            }),
        }),
        EntityKind::Way => Entity::Way(Way {
            meta,
            nodes: element
                .children_named("nd")
                .filter_map(|nd| nd.attr_parsed::<i64>("ref"))
                .map(EntityId::node)
                .collect(),
        }),
        EntityKind::Relation => Entity::Relation(Relation {
            meta,
            members: element
                .children_named("member")
                .filter_map(|member| {
                    let kind = EntityKind::from_element_name(member.attr("type")?)?;
                    let osm_id = member.attr_parsed::<i64>("ref")?;
                    Some(Member {
                        id: EntityId::new(kind, osm_id),
                        kind,
                        role: member.attr("role").unwrap_or_default().to_owned(),
                    })
                })
                .collect(),
        }),
    }
}

fn location(element: &Element) -> Option<Coord<f64>> {
    Some(Coord {
        x: element.attr_parsed("lon")?,
        y: element.attr_parsed("lat")?,
    })
}

/// Decode a note element at its reported location.
///
/// Returns `None` when the note has no id or no position.
#[must_use]
pub fn decode_note(element: &Element) -> Option<Note> {
    let mut note = Note::new(note_id(element)?, location(element)?);
    for child in &element.children {
        match child.name.as_str() {
            "status" => note.status = NoteStatus::from_api(&child.text),
            "date_created" => note.date_created = Some(child.text.clone()),
            "date_closed" => note.date_closed = Some(child.text.clone()),
            "comments" => {
                note.comments = child
                    .children_named("comment")
                    .map(decode_comment)
                    .collect();
            }
            _ => {}
        }
    }
    Some(note)
}

fn decode_comment(element: &Element) -> NoteComment {
    NoteComment {
        uid: element
            .child_text("uid")
            .and_then(|uid| uid.parse().ok()),
        user: element.child_text("user").map(str::to_owned),
        date: element.child_text("date").map(str::to_owned),
        text: element.child_text("text").unwrap_or_default().to_owned(),
        action: element.child_text("action").unwrap_or_default().to_owned(),
    }
}

/// Decode a user element.
#[must_use]
pub fn decode_user(id: UserId, element: &Element) -> User {
    let mut user = User::new(id);
    user.display_name = element.attr("display_name").map(str::to_owned);
    user.account_created = element.attr("account_created").map(str::to_owned);
    user.image_url = element
        .descendants("img")
        .first()
        .and_then(|img| img.attr("href"))
        .map(str::to_owned);
    user.changesets_count = element
        .descendants("changesets")
        .first()
        .and_then(|changesets| changesets.attr_parsed("count"))
        .unwrap_or(0);
    user
}

/// Decode every `changeset` element in a changeset listing.
#[must_use]
pub fn decode_changesets(root: &Element) -> Vec<Changeset> {
    root.descendants("changeset")
        .into_iter()
        .map(|element| Changeset {
            id: element.attr_parsed::<u64>("id").map(ChangesetId),
            tags: tags(element),
        })
        .collect()
}

/// Contents of a capabilities response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Value of the `api` attribute of the `status` element.
    pub api_status: Option<String>,
    /// Imagery URL patterns the server asks clients not to use.
    pub blacklists: Vec<String>,
}

/// Decode a capabilities response.
#[must_use]
pub fn decode_capabilities(root: &Element) -> Capabilities {
    Capabilities {
        api_status: root
            .descendants("status")
            .first()
            .and_then(|status| status.attr("api"))
            .map(str::to_owned),
        blacklists: root
            .descendants("blacklist")
            .into_iter()
            .filter_map(|blacklist| blacklist.attr("regex"))
            .filter(|regex| !regex.is_empty())
            .map(str::to_owned)
            .collect(),
    }
}
