//! Session-level error taxonomy.

use thiserror::Error;
use waymark_core::{Changeset, NoteId};

use crate::{document::DocumentError, transport::TransportError};

const AUTH_FAILURE_STATUSES: [u16; 3] = [400, 401, 403];
const RATE_LIMIT_STATUSES: [u16; 2] = [429, 509];

/// Errors reported by [`OsmSession`](crate::OsmSession) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OsmError {
    /// The request reached the transport and failed there.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The session was reset while the operation was in flight. Nothing was
    /// written to the caches.
    #[error("connection switched while the request was in flight")]
    ConnectionSwitched,
    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(#[from] DocumentError),
    /// An upload is already in flight for this session.
    #[error("a changeset upload is already in progress")]
    ChangesetInFlight,
    /// An anonymous request was rate limited earlier in this session.
    #[error("rate limited: {0}")]
    RateLimited(TransportError),
    /// The operation requires an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,
    /// The note is not in the cache.
    #[error("note {0} is not loaded")]
    UnknownNote(NoteId),
    /// A note comment was required but empty.
    #[error("comment text must not be empty")]
    EmptyComment,
}

impl OsmError {
    /// HTTP status behind the failure, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Transport(err) | Self::RateLimited(err) => err.status(),
            _ => None,
        }
    }

    /// Whether the server rejected the request's credentials
    /// (bad request, unauthorized or forbidden).
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        self.status()
            .is_some_and(|status| AUTH_FAILURE_STATUSES.contains(&status))
    }

    /// Whether the server signalled a rate or bandwidth limit.
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        self.status()
            .is_some_and(|status| RATE_LIMIT_STATUSES.contains(&status))
    }
}

/// A failed changeset upload.
///
/// The changeset is handed back so the upload can be retried. Once the
/// server has opened a changeset the returned value carries its id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("changeset upload failed: {error}")]
pub struct UploadFailure {
    /// Cause of the failure.
    #[source]
    pub error: OsmError,
    /// The changeset passed to the upload, with its id when one was assigned.
    pub changeset: Changeset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn http(status: u16) -> OsmError {
        OsmError::Transport(TransportError::Http {
            url: "https://api.example.test/api/0.6/map".to_owned(),
            status,
            message: String::new(),
        })
    }

    #[rstest]
    #[case(400, true, false)]
    #[case(401, true, false)]
    #[case(403, true, false)]
    #[case(404, false, false)]
    #[case(429, false, true)]
    #[case(509, false, true)]
    #[case(500, false, false)]
    fn classifies_statuses(#[case] status: u16, #[case] auth: bool, #[case] limited: bool) {
        let err = http(status);
        assert_eq!(err.status(), Some(status));
        assert_eq!(err.is_auth_failure(), auth);
        assert_eq!(err.is_rate_limit(), limited);
    }

    #[rstest]
    fn synthetic_errors_have_no_status() {
        assert_eq!(OsmError::ConnectionSwitched.status(), None);
        assert!(!OsmError::ChangesetInFlight.is_auth_failure());
    }
}
