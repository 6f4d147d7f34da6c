//! Errors raised by [`Transport`](super::Transport) implementations.

use thiserror::Error;

/// Failure of a single API round trip.
///
/// The type is `Clone` so a session can latch a rate-limit failure and report
/// it again from a later status probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("request to {url} failed with status {status}: {message}")]
    Http {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
    /// The request did not produce a response.
    #[error("network error while requesting {url}: {message}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying error description.
        message: String,
    },
    /// The request exceeded the configured timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout {
        /// Requested URL.
        url: String,
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },
    /// A credentialed request was attempted without credentials.
    #[error("no credentials are available for an authenticated request")]
    NotAuthenticated,
}

impl TransportError {
    /// HTTP status carried by the failure, if the server answered at all.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
