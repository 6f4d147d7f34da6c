//! Changeset upload: open (or reuse), upload, close.

use futures_util::future::{AbortHandle, Abortable};
use log::{debug, info};
use waymark_core::{Changeset, ChangesetId, OsmChange};

use super::{
    OsmSession,
    epoch::EpochToken,
    state::UploadPhase,
};
use crate::{
    DocumentError, OsmError, Transport, UploadFailure,
    encode::{encode_changeset, encode_osm_change},
    transport::ApiRequest,
};

const CREATE_PATH: &str = "/api/0.6/changeset/create";

impl<T: Transport + 'static> OsmSession<T> {
    /// Upload `changes` inside `changeset`.
    ///
    /// A changeset left open by an earlier failed upload is reused;
    /// otherwise a new one is opened. After a successful upload the open
    /// reference is cleared, a close request is sent in the background and
    /// the call resolves once the configured settle delay has passed.
    ///
    /// Only one upload runs at a time.
    ///
    /// # Errors
    ///
    /// Returns an [`UploadFailure`] carrying the changeset and one of:
    /// [`OsmError::ChangesetInFlight`] when another upload is running, the
    /// transport failure of either request (credential rejections also log
    /// the session out), a malformed create response, or
    /// [`OsmError::ConnectionSwitched`] after a reset. Failures are never
    /// retried.
    ///
    /// # Panics
    ///
    /// Panics if called outside a [`tokio::task::LocalSet`].
    pub async fn put_changeset(
        &self,
        changeset: Changeset,
        changes: &OsmChange,
    ) -> Result<Changeset, UploadFailure> {
        let token = self.inner.epoch.token();
        let reuse = {
            let state = self.inner.state.borrow();
            if state.changeset.phase != UploadPhase::Idle {
                return Err(UploadFailure {
                    error: OsmError::ChangesetInFlight,
                    changeset,
                });
            }
            state.changeset.open
        };

        let id = match reuse {
            Some(id) => {
                debug!("reusing open changeset {id}");
                id
            }
            None => match self.open_changeset(&changeset, token).await {
                Ok(id) => id,
                Err(error) => return Err(UploadFailure { error, changeset }),
            },
        };

        let opened = changeset.with_id(id);
        let body = encode_osm_change(changes, id);
        let path = format!("/api/0.6/changeset/{id}/upload");
        if let Err(error) = self
            .send_phase(UploadPhase::Uploading, ApiRequest::post(path, Some(body)), token)
            .await
        {
            return Err(UploadFailure {
                error,
                changeset: opened,
            });
        }

        self.inner.state.borrow_mut().changeset.open = None;
        info!("uploaded changeset {id}");
        self.spawn_close(id, token);
        tokio::time::sleep(self.inner.config.settle_delay).await;
        Ok(opened)
    }

    async fn open_changeset(
        &self,
        changeset: &Changeset,
        token: EpochToken,
    ) -> Result<ChangesetId, OsmError> {
        let request = ApiRequest::put(CREATE_PATH, Some(encode_changeset(changeset)));
        let body = self.send_phase(UploadPhase::Opening, request, token).await?;
        let id = body
            .trim()
            .parse::<u64>()
            .map(ChangesetId)
            .map_err(|_| DocumentError::Unexpected(format!("changeset id {:?}", body.trim())))?;
        self.inner.state.borrow_mut().changeset.open = Some(id);
        debug!("opened changeset {id}");
        Ok(id)
    }

    /// Run one abortable upload request, holding the single-flight marker
    /// for its duration.
    async fn send_phase(
        &self,
        phase: UploadPhase,
        request: ApiRequest,
        token: EpochToken,
    ) -> Result<String, OsmError> {
        let (handle, registration) = AbortHandle::new_pair();
        self.inner.state.borrow_mut().changeset.begin(phase, handle);

        let outcome = Abortable::new(self.inner.transport.send(request), registration).await;
        token.check(&self.inner.epoch)?;
        self.inner.state.borrow_mut().changeset.finish();

        let result = outcome.map_err(|_| OsmError::ConnectionSwitched)?;
        result.map_err(|err| {
            let err = OsmError::from(err);
            self.handle_auth_failure(&err);
            err
        })
    }

    fn spawn_close(&self, id: ChangesetId, token: EpochToken) {
        if !token.is_current(&self.inner.epoch) {
            return;
        }
        let session = self.clone();
        tokio::task::spawn_local(async move {
            let request = ApiRequest::put(format!("/api/0.6/changeset/{id}/close"), None);
            if let Err(err) = session.inner.transport.send(request).await {
                debug!("ignoring failure to close changeset {id}: {err}");
            }
        });
    }
}
