//! Cooperative decoding of response documents into the session caches.

use log::warn;
use waymark_core::{EntityId, UserId};

use super::{OsmSession, epoch::EpochToken};
use crate::{
    Document, OsmError, Transport,
    decode::{
        DecodeOptions, ElementKind, Record, decode_entity, decode_note, decode_user, entity_id,
        user_id,
    },
    document::Element,
};

impl<T: Transport + 'static> OsmSession<T> {
    /// Parse a body and decode its top-level elements.
    pub(super) async fn decode_body(
        &self,
        body: &str,
        options: DecodeOptions,
        token: EpochToken,
    ) -> Result<Vec<Record>, OsmError> {
        let document = Document::parse(body)?;
        self.decode_document(&document, options, token).await
    }

    /// Decode every top-level element of `document` in order.
    ///
    /// Work is split into slices of `decode_slice` elements; the task yields
    /// between slices and stops with [`OsmError::ConnectionSwitched`] if the
    /// session was reset meanwhile.
    pub(super) async fn decode_document(
        &self,
        document: &Document,
        options: DecodeOptions,
        token: EpochToken,
    ) -> Result<Vec<Record>, OsmError> {
        let slice = self.inner.config.decode_slice.max(1);
        let mut records = Vec::new();
        for (index, element) in document.root().children.iter().enumerate() {
            if index > 0 && index % slice == 0 {
                tokio::task::yield_now().await;
            }
            token.check(&self.inner.epoch)?;
            if let Some(record) = self.decode_element(element, options) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn decode_element(&self, element: &Element, options: DecodeOptions) -> Option<Record> {
        match ElementKind::classify(&element.name)? {
            ElementKind::Entity(kind) => {
                let Some(id) = entity_id(kind, element) else {
                    warn!("skipping {} element without a numeric id", element.name);
                    return None;
                };
                self.decode_entity_element(id, element, options)
            }
            ElementKind::Note => self.decode_note_element(element),
            ElementKind::User => {
                let Some(id) = user_id(element) else {
                    warn!("skipping user element without a numeric id");
                    return None;
                };
                self.decode_user_element(id, element, options)
            }
        }
    }

    fn decode_entity_element(
        &self,
        id: EntityId,
        element: &Element,
        options: DecodeOptions,
    ) -> Option<Record> {
        if options.skip_seen && !self.inner.state.borrow_mut().seen.insert(id) {
            return None;
        }
        Some(Record::Entity(decode_entity(id, element)))
    }

    fn decode_note_element(&self, element: &Element) -> Option<Record> {
        let Some(note) = decode_note(element) else {
            warn!("skipping note element without an id or location");
            return None;
        };
        let mut state = self.inner.state.borrow_mut();
        for uid in note.comment_authors() {
            if !state.users.users.contains_key(&uid) {
                state.users.to_load.insert(uid);
            }
        }
        Some(Record::Note(state.notes.upsert(note)))
    }

    fn decode_user_element(
        &self,
        id: UserId,
        element: &Element,
        options: DecodeOptions,
    ) -> Option<Record> {
        let mut state = self.inner.state.borrow_mut();
        if options.skip_seen && state.users.users.contains_key(&id) {
            state.users.to_load.remove(&id);
            return None;
        }
        let user = decode_user(id, element);
        state.users.insert(user.clone());
        Some(Record::User(user))
    }
}
