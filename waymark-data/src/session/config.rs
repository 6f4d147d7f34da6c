//! Session tunables.

use std::time::Duration;

use crate::transport::DEFAULT_API_URL;

/// Zoom level of the map-data tile grid.
pub const DEFAULT_TILE_ZOOM: u8 = 16;
/// Zoom level of the note tile grid.
pub const DEFAULT_NOTE_ZOOM: u8 = 13;
/// Maximum ids per batched read.
pub const DEFAULT_BATCH_SIZE: usize = 150;

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(2_500);
const DEFAULT_USER_THROTTLE: Duration = Duration::from_millis(750);
const DEFAULT_DECODE_SLICE: usize = 256;

/// Configuration for [`OsmSession`](crate::OsmSession).
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use waymark_data::SessionConfig;
///
/// let config = SessionConfig::default().with_settle_delay(Duration::ZERO);
/// assert_eq!(config.tile_zoom, 16);
/// assert_eq!(config.settle_delay, Duration::ZERO);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Zoom level of the map-data tile grid.
    pub tile_zoom: u8,
    /// Zoom level of the note tile grid.
    pub note_zoom: u8,
    /// Maximum ids per batched entity or user read.
    pub batch_size: usize,
    /// Delay between a successful upload and reporting it, giving read
    /// replicas time to catch up.
    pub settle_delay: Duration,
    /// Minimum spacing of the user loads triggered by note tiles.
    pub user_throttle: Duration,
    /// Elements decoded between cooperative yields.
    pub decode_slice: usize,
    /// Root of the web front end, used for links.
    pub url_root: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tile_zoom: DEFAULT_TILE_ZOOM,
            note_zoom: DEFAULT_NOTE_ZOOM,
            batch_size: DEFAULT_BATCH_SIZE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            user_throttle: DEFAULT_USER_THROTTLE,
            decode_slice: DEFAULT_DECODE_SLICE,
            url_root: DEFAULT_API_URL.to_owned(),
        }
    }
}

impl SessionConfig {
    /// Set the map-data tile zoom.
    #[must_use]
    pub const fn with_tile_zoom(mut self, tile_zoom: u8) -> Self {
        self.tile_zoom = tile_zoom;
        self
    }

    /// Set the note tile zoom.
    #[must_use]
    pub const fn with_note_zoom(mut self, note_zoom: u8) -> Self {
        self.note_zoom = note_zoom;
        self
    }

    /// Set the batch size; zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the post-upload settle delay.
    #[must_use]
    pub const fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Set the user-load throttle window.
    #[must_use]
    pub const fn with_user_throttle(mut self, user_throttle: Duration) -> Self {
        self.user_throttle = user_throttle;
        self
    }

    /// Set the number of elements decoded per slice; zero is treated as one.
    #[must_use]
    pub fn with_decode_slice(mut self, decode_slice: usize) -> Self {
        self.decode_slice = decode_slice.max(1);
        self
    }

    /// Set the web front-end root.
    #[must_use]
    pub fn with_url_root(mut self, url_root: impl Into<String>) -> Self {
        self.url_root = url_root.into();
        self
    }
}
