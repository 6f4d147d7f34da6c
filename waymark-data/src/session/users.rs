//! User lookups and the signed-in user's profile.

use futures_util::{StreamExt, stream::FuturesUnordered};
use log::debug;
use waymark_core::{Changeset, User, UserId};

use super::{OsmSession, epoch::EpochToken};
use crate::{
    DocumentError, OsmError, Transport,
    decode::{DecodeOptions, Record, decode_changesets},
    document::Document,
    transport::ApiRequest,
};

impl<T: Transport + 'static> OsmSession<T> {
    /// Look up users by id.
    ///
    /// Cached users are reported first in a single callback. Missing users
    /// are fetched in batches, one callback per batch. Anonymous sessions
    /// only ever see the cached subset.
    pub async fn load_users<F>(&self, ids: &[UserId], mut callback: F)
    where
        F: FnMut(Result<Vec<User>, OsmError>),
    {
        let mut cached = Vec::new();
        let mut missing = Vec::new();
        {
            let mut state = self.inner.state.borrow_mut();
            for id in ids {
                if cached.iter().any(|user: &User| user.id == *id) || missing.contains(id) {
                    continue;
                }
                if let Some(user) = state.users.users.get(id).cloned() {
                    state.users.to_load.remove(id);
                    cached.push(user);
                } else {
                    missing.push(*id);
                }
            }
        }

        let authenticated = self.authenticated();
        if !cached.is_empty() || !authenticated {
            callback(Ok(cached));
        }
        if !authenticated || missing.is_empty() {
            return;
        }

        let token = self.inner.epoch.token();
        let batch_size = self.inner.config.batch_size.max(1);
        let mut pending = FuturesUnordered::new();
        for chunk in missing.chunks(batch_size) {
            let list = chunk
                .iter()
                .map(UserId::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let path = format!("/api/0.6/users?users={list}");
            pending.push(async move {
                let body = self.send_credentialed(ApiRequest::get(path), token).await?;
                let records = self
                    .decode_body(&body, DecodeOptions::SKIP_SEEN, token)
                    .await?;
                Ok::<Vec<User>, OsmError>(
                    records.into_iter().filter_map(Record::into_user).collect(),
                )
            });
        }
        while let Some(result) = pending.next().await {
            callback(result);
        }
    }

    /// Look up a single user.
    ///
    /// Returns `Ok(None)` when the user is not cached and the session is
    /// anonymous.
    ///
    /// # Errors
    ///
    /// Returns the transport failure or [`OsmError::ConnectionSwitched`].
    pub async fn user(&self, id: UserId) -> Result<Option<User>, OsmError> {
        {
            let mut state = self.inner.state.borrow_mut();
            let cached = state.users.users.get(&id).cloned();
            if cached.is_some() || !self.authenticated() {
                state.users.to_load.remove(&id);
                return Ok(cached);
            }
        }

        let token = self.inner.epoch.token();
        let body = self
            .send_credentialed(ApiRequest::get(format!("/api/0.6/user/{id}")), token)
            .await?;
        let records = self
            .decode_body(&body, DecodeOptions::SKIP_SEEN, token)
            .await?;
        Ok(records.into_iter().find_map(Record::into_user))
    }

    /// Profile of the signed-in user, cached after the first success.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, [`OsmError::ConnectionSwitched`], or a
    /// malformed-response error when the reply holds no user.
    pub async fn user_details(&self) -> Result<User, OsmError> {
        if let Some(user) = self.inner.state.borrow().user_details.clone() {
            return Ok(user);
        }

        let token = self.inner.epoch.token();
        let body = self
            .send_credentialed(ApiRequest::get("/api/0.6/user/details"), token)
            .await?;
        let records = self
            .decode_body(&body, DecodeOptions::DECODE_ALL, token)
            .await?;
        let user = records
            .into_iter()
            .find_map(Record::into_user)
            .ok_or_else(|| DocumentError::Unexpected("user details without a user".to_owned()))?;
        self.inner.state.borrow_mut().user_details = Some(user.clone());
        Ok(user)
    }

    /// The signed-in user's changesets that carry a comment, cached after
    /// the first success.
    ///
    /// # Errors
    ///
    /// See [`OsmSession::user_details`].
    pub async fn user_changesets(&self) -> Result<Vec<Changeset>, OsmError> {
        if let Some(changesets) = self.inner.state.borrow().user_changesets.clone() {
            return Ok(changesets);
        }

        let token = self.inner.epoch.token();
        let user = self.user_details().await?;
        token.check(&self.inner.epoch)?;

        let path = format!("/api/0.6/changesets?user={}", user.id);
        let body = self.send_credentialed(ApiRequest::get(path), token).await?;
        let document = Document::parse(&body)?;
        let changesets: Vec<Changeset> = decode_changesets(document.root())
            .into_iter()
            .filter(|changeset| changeset.comment().is_some())
            .collect();
        self.inner.state.borrow_mut().user_changesets = Some(changesets.clone());
        Ok(changesets)
    }

    /// Send a credentialed request, checking the epoch before anything else
    /// and logging out when the server rejects our credentials.
    pub(super) async fn send_credentialed(
        &self,
        request: ApiRequest,
        token: EpochToken,
    ) -> Result<String, OsmError> {
        let result = self
            .inner
            .transport
            .send(request.credentialed(true))
            .await;
        token.check(&self.inner.epoch)?;
        result.map_err(|err| {
            let err = OsmError::from(err);
            self.handle_auth_failure(&err);
            err
        })
    }

    /// Load users referenced by notes, at most once per throttle window plus
    /// one trailing load.
    pub(super) fn throttle_user_load(&self) {
        let window = self.inner.config.user_throttle;
        let now = tokio::time::Instant::now();
        let delay = {
            let mut state = self.inner.state.borrow_mut();
            let elapsed = state.throttle.last_run.map(|last| now.duration_since(last));
            match elapsed {
                Some(elapsed) if elapsed < window => {
                    if state.throttle.trailing {
                        return;
                    }
                    state.throttle.trailing = true;
                    Some(window.saturating_sub(elapsed))
                }
                _ => {
                    state.throttle.last_run = Some(now);
                    None
                }
            }
        };

        let session = self.clone();
        match delay {
            None => session.spawn_pending_user_load(),
            Some(delay) => {
                let token = self.inner.epoch.token();
                tokio::task::spawn_local(async move {
                    tokio::time::sleep(delay).await;
                    if !token.is_current(&session.inner.epoch) {
                        return;
                    }
                    {
                        let mut state = session.inner.state.borrow_mut();
                        state.throttle.trailing = false;
                        state.throttle.last_run = Some(tokio::time::Instant::now());
                    }
                    session.spawn_pending_user_load();
                });
            }
        }
    }

    fn spawn_pending_user_load(&self) {
        let ids: Vec<UserId> = self.inner.state.borrow().users.to_load.iter().copied().collect();
        if ids.is_empty() {
            return;
        }
        let session = self.clone();
        tokio::task::spawn_local(async move {
            session
                .load_users(&ids, |result| {
                    if let Err(err) = result {
                        debug!("background user load failed: {err}");
                    }
                })
                .await;
        });
    }
}
