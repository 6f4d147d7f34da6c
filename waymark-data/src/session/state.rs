//! Mutable caches owned by a session.
//!
//! Everything here is replaced in one step on reset. Only completion handlers
//! running on the session's thread mutate it, and none of them hold a borrow
//! across a suspension point.

use std::collections::{BTreeSet, HashMap, HashSet};

use futures_util::future::AbortHandle;
use tokio::time::Instant;
use waymark_core::{Changeset, ChangesetId, EntityId, NoteStore, TileCoord, User, UserId};

use crate::tracker::Tracker;

/// An in-flight tile request.
#[derive(Debug)]
pub(crate) struct InflightTile {
    pub(crate) handle: AbortHandle,
    pub(crate) serial: u64,
}

/// Loaded and in-flight bookkeeping for one tile grid.
#[derive(Debug, Default)]
pub(crate) struct TileRequests {
    pub(crate) loaded: HashSet<TileCoord>,
    pub(crate) inflight: HashMap<TileCoord, InflightTile>,
}

impl TileRequests {
    fn abort_all(&mut self) {
        for (_, request) in self.inflight.drain() {
            request.handle.abort();
        }
    }
}

/// User records and ids waiting to be fetched.
#[derive(Debug, Default)]
pub(crate) struct UserCache {
    pub(crate) users: HashMap<UserId, User>,
    pub(crate) to_load: BTreeSet<UserId>,
}

impl UserCache {
    pub(crate) fn insert(&mut self, user: User) {
        self.to_load.remove(&user.id);
        self.users.insert(user.id, user);
    }
}

/// Phase of the changeset upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum UploadPhase {
    #[default]
    Idle,
    Opening,
    Uploading,
}

/// Changeset upload bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct ChangesetState {
    pub(crate) open: Option<ChangesetId>,
    pub(crate) phase: UploadPhase,
    pub(crate) inflight: Option<AbortHandle>,
}

impl ChangesetState {
    pub(crate) fn begin(&mut self, phase: UploadPhase, handle: AbortHandle) {
        self.phase = phase;
        self.inflight = Some(handle);
    }

    pub(crate) fn finish(&mut self) {
        self.phase = UploadPhase::Idle;
        self.inflight = None;
    }
}

/// Throttle bookkeeping for note-triggered user loads.
#[derive(Debug, Default)]
pub(crate) struct Throttle {
    pub(crate) last_run: Option<Instant>,
    pub(crate) trailing: bool,
}

/// All per-connection caches.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) tiles: TileRequests,
    pub(crate) seen: HashSet<EntityId>,
    pub(crate) note_tiles: TileRequests,
    pub(crate) notes: NoteStore,
    pub(crate) users: UserCache,
    pub(crate) changeset: ChangesetState,
    pub(crate) tracker: Tracker,
    pub(crate) user_details: Option<User>,
    pub(crate) user_changesets: Option<Vec<Changeset>>,
    pub(crate) throttle: Throttle,
    pub(crate) next_serial: u64,
}

impl SessionState {
    /// Abort every in-flight request and swap in empty caches. Imagery
    /// blacklists survive; the latched rate limit does not.
    pub(crate) fn reset(&mut self) {
        self.tiles.abort_all();
        self.note_tiles.abort_all();
        if let Some(handle) = self.changeset.inflight.take() {
            handle.abort();
        }
        let mut tracker = std::mem::take(&mut self.tracker);
        tracker.clear_rate_limit();
        *self = Self {
            tracker,
            ..Self::default()
        };
    }
}
