//! The API session: caches, tile scheduling and changeset uploads.
//!
//! [`OsmSession`] is a cheaply cloneable handle to single-threaded shared
//! state. Operations that overlap on the network run as local tasks, so the
//! session must be driven from inside a [`tokio::task::LocalSet`]. Handlers
//! complete one at a time on that thread; mutual exclusion comes from the
//! in-flight bookkeeping, never from locks.
//!
//! ```no_run
//! use waymark_data::{HttpTransport, OsmSession, SessionConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new("https://www.openstreetmap.org")?;
//! let session = OsmSession::new(transport, SessionConfig::default());
//! let status = session.status().await?;
//! println!("API is {status}");
//! # Ok(())
//! # }
//! ```

mod changeset;
mod config;
mod epoch;
mod ingest;
mod notes;
mod read;
mod state;
mod status;
mod tiles;
mod users;

#[cfg(test)]
mod tests;

use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    rc::Rc,
};

use log::{debug, warn};
use tokio::sync::broadcast;
use waymark_core::TileCoord;

pub use config::{DEFAULT_BATCH_SIZE, DEFAULT_NOTE_ZOOM, DEFAULT_TILE_ZOOM, SessionConfig};
pub use epoch::{ConnectionEpoch, EpochToken};
pub use tiles::TileCallback;

use crate::{OsmError, OsmUrls, transport::Transport};
use state::SessionState;

const EVENT_CAPACITY: usize = 64;

/// Notifications published to [`OsmSession::subscribe`] receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Authentication started.
    AuthLoading,
    /// Authentication finished, successfully or not.
    AuthDone,
    /// Connection or authentication state changed.
    Change,
    /// The first map-data tile request went out.
    Loading,
    /// The last in-flight map-data tile request finished or was dropped.
    Loaded,
    /// A note tile finished loading.
    NotesLoaded,
}

struct SessionInner<T> {
    transport: T,
    config: SessionConfig,
    epoch: ConnectionEpoch,
    state: RefCell<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    urls: RefCell<OsmUrls>,
    enabled: Cell<bool>,
    tile_zoom: Cell<u8>,
}

/// Handle to a client session against one API.
pub struct OsmSession<T> {
    inner: Rc<SessionInner<T>>,
}

impl<T> Clone for OsmSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for OsmSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsmSession")
            .field("epoch", &self.inner.epoch.current())
            .field("config", &self.inner.config)
            .field("enabled", &self.inner.enabled.get())
            .finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> OsmSession<T> {
    /// Create a session with empty caches.
    #[must_use]
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let urls = OsmUrls::new(&config.url_root);
        let tile_zoom = config.tile_zoom;
        Self {
            inner: Rc::new(SessionInner {
                transport,
                config,
                epoch: ConnectionEpoch::default(),
                state: RefCell::new(SessionState::default()),
                events,
                urls: RefCell::new(urls),
                enabled: Cell::new(true),
                tile_zoom: Cell::new(tile_zoom),
            }),
        }
    }

    /// Transport the session sends requests through.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current connection generation.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.current()
    }

    /// Browser links for the current URL root.
    #[must_use]
    pub fn urls(&self) -> OsmUrls {
        self.inner.urls.borrow().clone()
    }

    /// Receive session events from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Abort every in-flight operation and start a new connection generation
    /// with empty caches.
    pub fn reset(&self) {
        let epoch = self.inner.epoch.advance();
        self.inner.state.borrow_mut().reset();
        debug!("session reset to epoch {epoch}");
    }

    /// Point the session at a different API root, reset it, and eagerly load
    /// the user's changesets if signed in.
    pub fn switch(&self, url_root: &str) {
        self.inner.transport.switch_url_root(url_root);
        *self.inner.urls.borrow_mut() = OsmUrls::new(url_root);
        self.reset();
        self.prefetch_user_changesets();
        self.emit(SessionEvent::Change);
    }

    /// Enable or disable tile loading.
    pub fn toggle(&self, enabled: bool) {
        self.inner.enabled.set(enabled);
    }

    /// Whether tile loading is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.inner.enabled.get()
    }

    /// Zoom level of the map-data tile grid.
    #[must_use]
    pub fn tile_zoom(&self) -> u8 {
        self.inner.tile_zoom.get()
    }

    /// Change the zoom level of the map-data tile grid.
    pub fn set_tile_zoom(&self, tile_zoom: u8) {
        self.inner.tile_zoom.set(tile_zoom);
    }

    /// Map-data tiles loaded in this generation.
    #[must_use]
    pub fn loaded_tiles(&self) -> HashSet<TileCoord> {
        self.inner.state.borrow().tiles.loaded.clone()
    }

    /// Replace the set of loaded map-data tiles, e.g. when restoring history.
    pub fn set_loaded_tiles(&self, loaded: HashSet<TileCoord>) {
        self.inner.state.borrow_mut().tiles.loaded = loaded;
    }

    /// Note tiles loaded in this generation.
    #[must_use]
    pub fn loaded_note_tiles(&self) -> HashSet<TileCoord> {
        self.inner.state.borrow().note_tiles.loaded.clone()
    }

    /// Replace the set of loaded note tiles.
    pub fn set_loaded_note_tiles(&self, loaded: HashSet<TileCoord>) {
        self.inner.state.borrow_mut().note_tiles.loaded = loaded;
    }

    /// Whether the transport holds credentials.
    #[must_use]
    pub fn authenticated(&self) -> bool {
        self.inner.transport.authenticated()
    }

    /// Sign in through the transport.
    ///
    /// On success the latched rate limit is cleared and the user's
    /// changesets are loaded in the background.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, or [`OsmError::ConnectionSwitched`]
    /// when the session was reset meanwhile.
    pub async fn authenticate(&self) -> Result<(), OsmError> {
        let token = self.inner.epoch.token();
        self.clear_user_profile();
        self.emit(SessionEvent::AuthLoading);
        let result = self.inner.transport.authenticate().await;
        self.emit(SessionEvent::AuthDone);
        result?;
        token.check(&self.inner.epoch)?;

        self.inner.state.borrow_mut().tracker.clear_rate_limit();
        self.emit(SessionEvent::Change);
        self.prefetch_user_changesets();
        Ok(())
    }

    /// Drop credentials and the cached profile of the signed-in user.
    pub fn logout(&self) {
        self.clear_user_profile();
        self.inner.transport.logout();
        self.emit(SessionEvent::Change);
    }

    fn clear_user_profile(&self) {
        let mut state = self.inner.state.borrow_mut();
        state.user_details = None;
        state.user_changesets = None;
    }

    /// Log out after the server rejected our credentials.
    fn handle_auth_failure(&self, error: &OsmError) {
        if error.is_auth_failure() {
            warn!("credentials rejected, logging out: {error}");
            self.logout();
        }
    }

    fn prefetch_user_changesets(&self) {
        if !self.authenticated() {
            return;
        }
        let session = self.clone();
        tokio::task::spawn_local(async move {
            if let Err(err) = session.user_changesets().await {
                debug!("eager changeset load failed: {err}");
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        if self.inner.events.send(event).is_err() {
            debug!("no subscribers for {event:?}");
        }
    }
}
