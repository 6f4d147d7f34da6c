//! Tile scheduler for map data and notes.

use std::{collections::HashSet, rc::Rc};

use futures_util::future::{AbortHandle, AbortRegistration, Abortable};
use log::debug;
use waymark_core::{
    Entity, Note, Projection, Tile, TileCoord, Viewport, bbox_param, tiles_covering,
    visible_extent,
};

use super::{
    OsmSession, SessionEvent,
    epoch::EpochToken,
    state::{InflightTile, TileRequests},
};
use crate::{
    OsmError, Transport,
    decode::{DecodeOptions, Record},
};

/// Receives each map-data tile as it completes, with the tile's extent.
pub type TileCallback = Rc<dyn Fn(&Tile, Result<Vec<Entity>, OsmError>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TileSource {
    MapData,
    Notes,
}

impl TileSource {
    const fn path(self) -> &'static str {
        match self {
            Self::MapData => "/api/0.6/map?bbox=",
            Self::Notes => "/api/0.6/notes?bbox=",
        }
    }

    const fn decode_options(self) -> DecodeOptions {
        match self {
            Self::MapData => DecodeOptions::SKIP_SEEN,
            Self::Notes => DecodeOptions::DECODE_ALL,
        }
    }
}

struct TileFetch {
    tile: Tile,
    token: EpochToken,
    serial: u64,
    registration: AbortRegistration,
}

impl<T: Transport + 'static> OsmSession<T> {
    /// Request the map-data tiles covering the viewport.
    ///
    /// In-flight tiles that left the view are aborted, tiles already loaded
    /// or in flight are left alone, and every other covering tile is
    /// requested. `callback` receives each tile's entities as it completes;
    /// entities already decoded from an overlapping tile are omitted.
    /// Returns the tiles requested by this call.
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`tokio::task::LocalSet`].
    pub fn load_tiles(
        &self,
        projection: &dyn Projection,
        viewport: Viewport,
        callback: Option<TileCallback>,
    ) -> Vec<TileCoord> {
        self.schedule(TileSource::MapData, projection, viewport, callback)
    }

    /// Request the note tiles covering the viewport.
    ///
    /// Completed note tiles update the note cache, schedule a throttled load
    /// of newly referenced users and publish [`SessionEvent::NotesLoaded`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`tokio::task::LocalSet`].
    pub fn load_notes(&self, projection: &dyn Projection, viewport: Viewport) -> Vec<TileCoord> {
        self.schedule(TileSource::Notes, projection, viewport, None)
    }

    /// Cached notes inside the projection's visible extent.
    #[must_use]
    pub fn notes(&self, projection: &dyn Projection) -> Vec<Rc<Note>> {
        self.inner
            .state
            .borrow()
            .notes
            .search(&visible_extent(projection))
    }

    fn schedule(
        &self,
        source: TileSource,
        projection: &dyn Projection,
        viewport: Viewport,
        callback: Option<TileCallback>,
    ) -> Vec<TileCoord> {
        if !self.enabled() {
            return Vec::new();
        }
        let zoom = match source {
            TileSource::MapData => self.tile_zoom(),
            TileSource::Notes => self.inner.config.note_zoom,
        };
        let tiles = tiles_covering(projection, viewport, zoom);
        let wanted: HashSet<TileCoord> = tiles.iter().map(|tile| tile.coord).collect();

        let token = self.inner.epoch.token();
        let mut events = Vec::new();
        let mut fetches = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            let mut serial = state.next_serial;
            let requests = match source {
                TileSource::MapData => &mut state.tiles,
                TileSource::Notes => &mut state.note_tiles,
            };

            let had_requests = !requests.inflight.is_empty();
            drop_unwanted(requests, &wanted);
            if had_requests && source == TileSource::MapData && requests.inflight.is_empty() {
                events.push(SessionEvent::Loaded);
            }

            for tile in tiles {
                if requests.loaded.contains(&tile.coord)
                    || requests.inflight.contains_key(&tile.coord)
                {
                    continue;
                }
                if source == TileSource::MapData && requests.inflight.is_empty() {
                    events.push(SessionEvent::Loading);
                }
                serial = serial.wrapping_add(1);
                let (handle, registration) = AbortHandle::new_pair();
                requests
                    .inflight
                    .insert(tile.coord, InflightTile { handle, serial });
                fetches.push(TileFetch {
                    tile,
                    token,
                    serial,
                    registration,
                });
            }
            state.next_serial = serial;
        }

        for event in events {
            self.emit(event);
        }
        let requested = fetches.iter().map(|fetch| fetch.tile.coord).collect();
        for fetch in fetches {
            let session = self.clone();
            let callback = callback.clone();
            tokio::task::spawn_local(async move {
                session.fetch_tile(source, fetch, callback).await;
            });
        }
        requested
    }

    async fn fetch_tile(&self, source: TileSource, fetch: TileFetch, callback: Option<TileCallback>) {
        let TileFetch {
            tile,
            token,
            serial,
            registration,
        } = fetch;
        let path = format!("{}{}", source.path(), bbox_param(&tile.extent));

        let Ok(fetched) = Abortable::new(self.fetch_body(&path, token), registration).await else {
            debug!("tile {} aborted", tile.coord);
            return;
        };
        let result = match fetched {
            Ok(body) => self.decode_body(&body, source.decode_options(), token).await,
            Err(err) => Err(err),
        };

        if !token.is_current(&self.inner.epoch) {
            if let Some(callback) = &callback {
                callback(&tile, Err(OsmError::ConnectionSwitched));
            }
            return;
        }

        let now_idle = {
            let mut state = self.inner.state.borrow_mut();
            let requests = match source {
                TileSource::MapData => &mut state.tiles,
                TileSource::Notes => &mut state.note_tiles,
            };
            let owned = requests
                .inflight
                .get(&tile.coord)
                .is_some_and(|request| request.serial == serial);
            if owned {
                requests.inflight.remove(&tile.coord);
            }
            if result.is_ok() {
                requests.loaded.insert(tile.coord);
            }
            owned && requests.inflight.is_empty()
        };

        match source {
            TileSource::Notes => {
                if let Err(err) = &result {
                    debug!("note tile {} failed: {err}", tile.coord);
                }
                self.throttle_user_load();
                self.emit(SessionEvent::NotesLoaded);
            }
            TileSource::MapData => {
                if let Some(callback) = &callback {
                    let entities = result.map(|records| {
                        records.into_iter().filter_map(Record::into_entity).collect()
                    });
                    callback(&tile, entities);
                }
                if now_idle {
                    self.emit(SessionEvent::Loaded);
                }
            }
        }
    }
}

fn drop_unwanted(requests: &mut TileRequests, wanted: &HashSet<TileCoord>) {
    requests.inflight.retain(|coord, request| {
        let keep = wanted.contains(coord);
        if !keep {
            debug!("aborting tile {coord}");
            request.handle.abort();
        }
        keep
    });
}
