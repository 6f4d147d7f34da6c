//! Networked side of the Waymark sync engine.
//!
//! Responsibilities:
//! - Send API requests through a pluggable [`Transport`]; [`HttpTransport`]
//!   is the production implementation.
//! - Parse XML responses into a [`Document`] and decode them into domain
//!   records.
//! - Host the [`OsmSession`]: tile scheduling, caches, user lookups, note
//!   actions, changeset uploads and the rate-limit/blacklist tracker.
//!
//! Boundaries:
//! - Domain types and tile maths live in `waymark-core`.
//! - Authentication handshakes live behind the transport.
//!
//! Invariants:
//! - A session is single-threaded and must be driven inside a
//!   [`tokio::task::LocalSet`].
//! - No global mutable state; every cache hangs off a session.

pub mod decode;
mod document;
pub mod encode;
mod error;
mod session;
mod tracker;
mod transport;
mod urls;

#[doc(hidden)]
pub mod test_support;

pub use decode::{
    Capabilities, DecodeOptions, Record, decode_capabilities, decode_changesets, decode_entity,
    decode_note, decode_user,
};
pub use document::{Document, DocumentError, Element};
pub use encode::{encode_changeset, encode_osm_change};
pub use error::{OsmError, UploadFailure};
pub use session::{
    ConnectionEpoch, DEFAULT_BATCH_SIZE, DEFAULT_NOTE_ZOOM, DEFAULT_TILE_ZOOM, EpochToken,
    OsmSession, SessionConfig, SessionEvent, TileCallback,
};
pub use tracker::{ApiStatus, DEFAULT_BLACKLIST, Tracker};
pub use transport::{
    ApiRequest, DEFAULT_API_URL, DEFAULT_USER_AGENT, HttpTransport, HttpTransportConfig, Method,
    Transport, TransportBuildError, TransportError,
};
pub use urls::OsmUrls;
