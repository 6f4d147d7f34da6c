//! Note lookups and note actions.

use std::rc::Rc;

use log::debug;
use url::form_urlencoded;
use waymark_core::{Note, NoteId};

use super::OsmSession;
use crate::{
    DocumentError, OsmError, Transport,
    decode::{DecodeOptions, Record},
    transport::ApiRequest,
};

impl<T: Transport + 'static> OsmSession<T> {
    /// Cached note by id.
    #[must_use]
    pub fn get_note(&self, id: NoteId) -> Option<Rc<Note>> {
        self.inner.state.borrow().notes.get(id)
    }

    /// Store an updated note in place of the cached one.
    pub fn replace_note(&self, note: Note) -> Rc<Note> {
        self.inner.state.borrow_mut().notes.replace(note)
    }

    /// Close an open note or reopen a closed one, optionally with a comment.
    ///
    /// # Errors
    ///
    /// Returns [`OsmError::NotAuthenticated`] for anonymous sessions,
    /// [`OsmError::UnknownNote`] when the note is not cached, or the failure
    /// of the request itself. A credential rejection also logs the session
    /// out.
    pub async fn toggle_note_status(
        &self,
        id: NoteId,
        comment: Option<&str>,
    ) -> Result<Rc<Note>, OsmError> {
        let note = self.note_for_action(id)?;
        let action = note.status.toggle_action();
        let path = match comment.filter(|text| !text.is_empty()) {
            Some(text) => format!("/api/0.6/notes/{id}/{action}?text={}", encode_text(text)),
            None => format!("/api/0.6/notes/{id}/{action}"),
        };
        self.post_note_action(path).await
    }

    /// Add a comment to a note without changing its status.
    ///
    /// # Errors
    ///
    /// Returns [`OsmError::EmptyComment`] for an empty comment, otherwise as
    /// [`OsmSession::toggle_note_status`].
    pub async fn add_note_comment(&self, id: NoteId, comment: &str) -> Result<Rc<Note>, OsmError> {
        if comment.is_empty() {
            return Err(OsmError::EmptyComment);
        }
        self.note_for_action(id)?;
        let path = format!("/api/0.6/notes/{id}/comment?text={}", encode_text(comment));
        self.post_note_action(path).await
    }

    fn note_for_action(&self, id: NoteId) -> Result<Rc<Note>, OsmError> {
        if !self.authenticated() {
            return Err(OsmError::NotAuthenticated);
        }
        self.get_note(id).ok_or(OsmError::UnknownNote(id))
    }

    async fn post_note_action(&self, path: String) -> Result<Rc<Note>, OsmError> {
        debug!("posting note action {path}");
        let token = self.inner.epoch.token();
        let body = self
            .send_credentialed(ApiRequest::post(path, None), token)
            .await?;
        // The decoder upserts the returned note into the cache.
        self.decode_body(&body, DecodeOptions::DECODE_ALL, token)
            .await?
            .into_iter()
            .find_map(Record::into_note)
            .ok_or_else(|| DocumentError::Unexpected("note action without a note".to_owned()).into())
    }
}

fn encode_text(text: &str) -> String {
    form_urlencoded::byte_serialize(text.as_bytes()).collect()
}
