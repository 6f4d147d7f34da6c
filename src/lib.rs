//! Facade crate for the Waymark sync engine.
//!
//! This crate re-exports the domain types from `waymark-core` and the
//! networked session from `waymark-data`. Serde support for the domain types
//! sits behind the `serde` feature.

#![forbid(unsafe_code)]

pub use waymark_core::{
    Changeset, ChangesetId, Entity, EntityId, EntityKind, EntityMeta, MercatorProjection, Member,
    Node, Note, NoteComment, NoteId, NoteStatus, NoteStore, OsmChange, Projection, Relation, Tags,
    Tile, TileCoord, User, UserId, Viewport, Way,
};

pub use waymark_data::{
    ApiStatus, HttpTransport, HttpTransportConfig, OsmError, OsmSession, SessionConfig,
    SessionEvent, TileCallback, Transport, TransportError, UploadFailure,
};
