//! Links into the web front end that accompanies the API.

use geo::Coord;
use url::Url;
use waymark_core::{ChangesetId, EntityId};

/// Builds browser links relative to the active URL root.
///
/// # Examples
/// ```
/// use waymark_core::{ChangesetId, EntityId};
/// use waymark_data::OsmUrls;
///
/// let urls = OsmUrls::new("https://www.openstreetmap.org");
/// assert_eq!(urls.changeset_url(ChangesetId(5)), "https://www.openstreetmap.org/changeset/5");
/// assert_eq!(urls.entity_url(EntityId::way(7)), "https://www.openstreetmap.org/way/7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsmUrls {
    url_root: String,
}

impl OsmUrls {
    /// Links under `url_root`.
    #[must_use]
    pub fn new(url_root: &str) -> Self {
        Self {
            url_root: url_root.trim_end_matches('/').to_owned(),
        }
    }

    /// Root the links are built from.
    #[must_use]
    pub fn url_root(&self) -> &str {
        &self.url_root
    }

    /// Page of a single changeset.
    #[must_use]
    pub fn changeset_url(&self, id: ChangesetId) -> String {
        format!("{}/changeset/{id}", self.url_root)
    }

    /// History map centred on `center` at `zoom`. Coordinates get more
    /// decimals as the zoom increases.
    #[must_use]
    pub fn changesets_url(&self, center: Coord<f64>, zoom: f64) -> String {
        let precision = precision_for_zoom(zoom);
        format!(
            "{}/history#map={}/{:.precision$}/{:.precision$}",
            self.url_root,
            zoom.floor(),
            center.y,
            center.x,
        )
    }

    /// Page of an entity.
    #[must_use]
    pub fn entity_url(&self, id: EntityId) -> String {
        format!("{}/{}/{}", self.url_root, id.kind(), id.osm_id())
    }

    /// Version history of an entity.
    #[must_use]
    pub fn history_url(&self, id: EntityId) -> String {
        format!("{}/history", self.entity_url(id))
    }

    /// Profile page of a user, by display name.
    #[must_use]
    pub fn user_url(&self, display_name: &str) -> String {
        let Ok(mut url) = Url::parse(&self.url_root) else {
            return format!("{}/user/{display_name}", self.url_root);
        };
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("user").push(display_name);
        }
        url.into()
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "precision is clamped to a small non-negative range"
)]
fn precision_for_zoom(zoom: f64) -> usize {
    zoom.log2().ceil().clamp(0.0, 16.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn urls() -> OsmUrls {
        OsmUrls::new("https://www.openstreetmap.org/")
    }

    #[rstest]
    fn history_links_to_entity_history(urls: OsmUrls) {
        assert_eq!(
            urls.history_url(EntityId::relation(3)),
            "https://www.openstreetmap.org/relation/3/history"
        );
    }

    #[rstest]
    fn changesets_precision_tracks_zoom(urls: OsmUrls) {
        let center = Coord { x: -0.123_456_789, y: 51.987_654_321 };
        assert_eq!(
            urls.changesets_url(center, 16.5),
            "https://www.openstreetmap.org/history#map=16/51.98765/-0.12346"
        );
        assert_eq!(
            urls.changesets_url(center, 1.0),
            "https://www.openstreetmap.org/history#map=1/52/-0"
        );
    }

    #[rstest]
    fn user_names_are_path_encoded(urls: OsmUrls) {
        assert_eq!(
            urls.user_url("Jane Doe/x"),
            "https://www.openstreetmap.org/user/Jane%20Doe%2Fx"
        );
    }
}
