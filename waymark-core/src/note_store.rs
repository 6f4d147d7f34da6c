//! In-memory, spatially indexed note cache.
//!
//! Notes are kept in two structures: a map keyed by [`NoteId`] for lookups,
//! and an R\*-tree for bounding-box queries. Both always hold the same set of
//! notes. Two notes never share an exact position in the index; a note that
//! would land on top of another is nudged north-east until its spot is free so
//! that map markers stay individually selectable.

use std::{collections::HashMap, rc::Rc};

use geo::{Coord, Rect};
use rstar::{AABB, RTree, RTreeObject};

use crate::{Note, NoteId};

/// Offset, in degrees, applied to both axes when a position is taken.
pub const COLLISION_EPSILON: f64 = 0.000_01;

#[derive(Debug, Clone)]
struct IndexedNote {
    point: [f64; 2],
    note: Rc<Note>,
}

impl PartialEq for IndexedNote {
    fn eq(&self, other: &Self) -> bool {
        self.note.id == other.note.id && self.point == other.point
    }
}

impl RTreeObject for IndexedNote {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

/// Cache of notes keyed by id and indexed by location.
///
/// # Examples
/// ```
/// use geo::{Coord, Rect};
/// use waymark_core::{Note, NoteId, NoteStore};
///
/// let mut store = NoteStore::new();
/// store.upsert(Note::new(NoteId(1), Coord { x: 1.0, y: 1.0 }));
/// let moved = store.upsert(Note::new(NoteId(2), Coord { x: 1.0, y: 1.0 }));
/// assert!(moved.location.x > 1.0);
///
/// let hits = store.search(&Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 2.0, y: 2.0 }));
/// assert_eq!(hits.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct NoteStore {
    notes: HashMap<NoteId, Rc<Note>>,
    index: RTree<IndexedNote>,
}

impl NoteStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a note, replacing any cached note with the same id.
    ///
    /// The stored note may sit at a slightly different location than the one
    /// supplied when its position was already taken by another note. The
    /// stored copy is returned.
    pub fn upsert(&mut self, mut note: Note) -> Rc<Note> {
        self.remove(note.id);
        note.location = self.free_location(note.location);
        let note = Rc::new(note);
        self.index.insert(IndexedNote {
            point: [note.location.x, note.location.y],
            note: Rc::clone(&note),
        });
        self.notes.insert(note.id, Rc::clone(&note));
        note
    }

    /// Replace a cached note with an updated copy.
    ///
    /// Equivalent to [`NoteStore::upsert`]; kept separate so call sites read
    /// as an update of a note the caller already holds.
    pub fn replace(&mut self, note: Note) -> Rc<Note> {
        self.upsert(note)
    }

    /// Drop a note from both the map and the index.
    pub fn remove(&mut self, id: NoteId) -> Option<Rc<Note>> {
        let existing = self.notes.remove(&id)?;
        self.index.remove(&IndexedNote {
            point: [existing.location.x, existing.location.y],
            note: Rc::clone(&existing),
        });
        Some(existing)
    }

    /// Fetch a cached note by id.
    #[must_use]
    pub fn get(&self, id: NoteId) -> Option<Rc<Note>> {
        self.notes.get(&id).cloned()
    }

    /// All cached notes whose location falls inside `bbox`.
    #[must_use]
    pub fn search(&self, bbox: &Rect<f64>) -> Vec<Rc<Note>> {
        let envelope =
            AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y]);
        self.index
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| Rc::clone(&entry.note))
            .collect()
    }

    /// Number of cached notes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Whether the store holds no notes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Remove every cached note.
    pub fn clear(&mut self) {
        self.notes.clear();
        self.index = RTree::new();
    }

    fn is_taken(&self, location: Coord<f64>) -> bool {
        let envelope = AABB::from_point([location.x, location.y]);
        self.index
            .locate_in_envelope_intersecting(&envelope)
            .next()
            .is_some()
    }

    #[expect(clippy::float_arithmetic, reason = "collisions step by a fixed offset")]
    fn free_location(&self, mut location: Coord<f64>) -> Coord<f64> {
        // Each occupied position can block at most one step.
        for _ in 0..=self.notes.len() {
            if !self.is_taken(location) {
                break;
            }
            location.x += COLLISION_EPSILON;
            location.y += COLLISION_EPSILON;
        }
        location
    }
}
