//! Core domain types for the Waymark sync engine.
//!
//! Everything here is synchronous and free of I/O: map entities, notes,
//! users, changesets, tile grid maths and the spatially indexed note cache.
//! The networked session in `waymark-data` builds on these types.

mod changeset;
mod entity;
mod note;
pub mod note_store;
mod tile;
mod user;

pub use changeset::{Changeset, ChangesetId, OsmChange};
pub use entity::{
    Entity, EntityId, EntityIdError, EntityKind, EntityMeta, Member, Node, Relation, Tags, Way,
};
pub use note::{Note, NoteComment, NoteId, NoteStatus};
pub use note_store::NoteStore;
pub use tile::{
    MercatorProjection, Projection, TILE_SIZE, Tile, TileCoord, Viewport, bbox_param,
    tiles_covering, visible_extent,
};
pub use user::{User, UserId};
