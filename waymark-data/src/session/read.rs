//! Shared read path and entity reads.

use std::collections::BTreeMap;

use futures_util::{StreamExt, stream::FuturesUnordered};
use log::{debug, warn};
use waymark_core::{Entity, EntityId, EntityKind};

use super::{OsmSession, SessionEvent, epoch::EpochToken};
use crate::{
    OsmError, Transport,
    decode::{DecodeOptions, Record},
    transport::ApiRequest,
};

impl<T: Transport + 'static> OsmSession<T> {
    /// Fetch `path`, credentialed when signed in.
    ///
    /// When the server rejects our credentials the session logs out and the
    /// read is retried once anonymously. An anonymous read that hits a rate
    /// limit latches the failure for the next status probe.
    pub(super) async fn fetch_body(&self, path: &str, token: EpochToken) -> Result<String, OsmError> {
        let mut retried = false;
        loop {
            let authenticated = self.authenticated();
            let request = ApiRequest::get(path).credentialed(authenticated);
            let result = self.inner.transport.send(request).await;
            token.check(&self.inner.epoch)?;

            let err = match result {
                Ok(body) => return Ok(body),
                Err(err) => OsmError::from(err),
            };
            if authenticated && !retried && err.is_auth_failure() {
                warn!("read of {path} rejected credentials, retrying anonymously");
                self.logout();
                retried = true;
                continue;
            }
            if !authenticated && err.is_rate_limit() {
                self.latch_rate_limit(&err);
            }
            return Err(err);
        }
    }

    fn latch_rate_limit(&self, error: &OsmError) {
        let OsmError::Transport(transport_error) = error else {
            return;
        };
        let latched = self
            .inner
            .state
            .borrow_mut()
            .tracker
            .latch_rate_limit(transport_error.clone());
        if latched {
            self.emit(SessionEvent::Change);
        }
    }

    /// Read `path` and decode the response.
    ///
    /// # Errors
    ///
    /// Returns the transport failure, a malformed-response error, or
    /// [`OsmError::ConnectionSwitched`] after a reset.
    pub async fn load_from_api(
        &self,
        path: &str,
        options: DecodeOptions,
    ) -> Result<Vec<Record>, OsmError> {
        let token = self.inner.epoch.token();
        let body = self.fetch_body(path, token).await?;
        self.decode_body(&body, options, token).await
    }

    /// Load one entity. Ways and relations come back with every node they
    /// reference.
    ///
    /// # Errors
    ///
    /// See [`OsmSession::load_from_api`].
    pub async fn load_entity(&self, id: EntityId) -> Result<Vec<Entity>, OsmError> {
        let kind = id.kind();
        let full = if kind == EntityKind::Node { "" } else { "/full" };
        let path = format!("/api/0.6/{kind}/{}{full}", id.osm_id());
        self.load_entities(&path).await
    }

    /// Load a specific historic version of an entity.
    ///
    /// # Errors
    ///
    /// See [`OsmSession::load_from_api`].
    pub async fn load_entity_version(
        &self,
        id: EntityId,
        version: u64,
    ) -> Result<Vec<Entity>, OsmError> {
        let path = format!("/api/0.6/{}/{}/{version}", id.kind(), id.osm_id());
        self.load_entities(&path).await
    }

    /// Load many entities in batched requests.
    ///
    /// Ids are de-duplicated and grouped by kind, then fetched in chunks of
    /// the configured batch size. `callback` runs once per chunk as each
    /// response arrives.
    pub async fn load_multiple<F>(&self, ids: &[EntityId], mut callback: F)
    where
        F: FnMut(Result<Vec<Entity>, OsmError>),
    {
        let mut by_kind: BTreeMap<EntityKind, Vec<i64>> = BTreeMap::new();
        for id in ids {
            let group = by_kind.entry(id.kind()).or_default();
            if !group.contains(&id.osm_id()) {
                group.push(id.osm_id());
            }
        }

        let batch_size = self.inner.config.batch_size.max(1);
        let mut pending = FuturesUnordered::new();
        for (kind, osm_ids) in &by_kind {
            for chunk in osm_ids.chunks(batch_size) {
                let list = chunk
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                let path = format!("/api/0.6/{kind}s?{kind}s={list}");
                debug!("loading {} {kind}s", chunk.len());
                pending.push(async move { self.load_entities(&path).await });
            }
        }
        while let Some(result) = pending.next().await {
            callback(result);
        }
    }

    async fn load_entities(&self, path: &str) -> Result<Vec<Entity>, OsmError> {
        let records = self.load_from_api(path, DecodeOptions::DECODE_ALL).await?;
        Ok(records.into_iter().filter_map(Record::into_entity).collect())
    }
}
