//! Capabilities probe, imagery blacklists and the latched rate limit.

use log::debug;

use super::OsmSession;
use crate::{
    Document, DocumentError, OsmError, Transport,
    decode::decode_capabilities,
    tracker::ApiStatus,
    transport::ApiRequest,
};

impl<T: Transport + 'static> OsmSession<T> {
    /// Probe the API's capabilities.
    ///
    /// Advertised imagery blacklists replace the current set when the
    /// response lists any. A rate limit latched earlier in this generation is
    /// reported in place of the advertised status.
    ///
    /// # Errors
    ///
    /// Returns [`OsmError::RateLimited`] while a rate limit is latched, the
    /// transport failure, [`OsmError::ConnectionSwitched`] after a reset, or a
    /// malformed-response error when the status is missing.
    pub async fn status(&self) -> Result<ApiStatus, OsmError> {
        let token = self.inner.epoch.token();
        let result = self
            .inner
            .transport
            .send(ApiRequest::get("/api/capabilities"))
            .await;
        token.check(&self.inner.epoch)?;

        let body = result?;
        let document = Document::parse(&body)?;
        let capabilities = decode_capabilities(document.root());
        debug!(
            "capabilities advertise {} imagery blacklists",
            capabilities.blacklists.len()
        );

        let mut state = self.inner.state.borrow_mut();
        state.tracker.replace_blacklists(capabilities.blacklists);
        if let Some(limit) = state.tracker.rate_limit() {
            return Err(OsmError::RateLimited(limit.clone()));
        }
        capabilities
            .api_status
            .map(|status| ApiStatus::from_api(&status))
            .ok_or_else(|| DocumentError::Unexpected("capabilities without a status".to_owned()).into())
    }

    /// Imagery URL patterns currently in force.
    #[must_use]
    pub fn imagery_blacklists(&self) -> Vec<String> {
        self.inner.state.borrow().tracker.blacklists().to_vec()
    }

    /// Whether an imagery URL matches any blacklist pattern.
    #[must_use]
    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.inner.state.borrow().tracker.is_blacklisted(url)
    }
}
