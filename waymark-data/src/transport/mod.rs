//! Request transport abstraction.
//!
//! The session never talks to the network directly. Every round trip goes
//! through a [`Transport`], which owns credentials and the API root. This
//! keeps the authentication handshake out of the session and lets tests
//! substitute a scripted transport.

mod error;
mod http;

use async_trait::async_trait;

pub use error::TransportError;
pub use http::{
    DEFAULT_API_URL, DEFAULT_USER_AGENT, HttpTransport, HttpTransportConfig, TransportBuildError,
};

/// HTTP verb of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create or replace.
    Put,
    /// Action or upload.
    Post,
}

impl Method {
    /// Upper-case verb name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
        }
    }
}

/// A single API request, relative to the transport's URL root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// HTTP verb.
    pub method: Method,
    /// Path and query, starting with `/`.
    pub path: String,
    /// XML body for writes.
    pub body: Option<String>,
    /// Whether the request must carry credentials.
    pub credentialed: bool,
}

impl ApiRequest {
    /// Anonymous read.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: None,
            credentialed: false,
        }
    }

    /// Credentialed `PUT` with an optional body.
    #[must_use]
    pub fn put(path: impl Into<String>, body: Option<String>) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            body,
            credentialed: true,
        }
    }

    /// Credentialed `POST` with an optional body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Option<String>) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            body,
            credentialed: true,
        }
    }

    /// Mark the request as requiring credentials.
    #[must_use]
    pub const fn credentialed(mut self, credentialed: bool) -> Self {
        self.credentialed = credentialed;
        self
    }
}

/// Sends API requests and manages the credentials used to sign them.
///
/// Implementations are driven from a single thread; the session holds the
/// transport behind an `Rc` and calls it from local tasks.
#[async_trait(?Send)]
pub trait Transport {
    /// Whether credentials are currently available.
    fn authenticated(&self) -> bool;

    /// Establish credentials.
    async fn authenticate(&self) -> Result<(), TransportError>;

    /// Forget credentials.
    fn logout(&self);

    /// Point subsequent requests at a different API root.
    fn switch_url_root(&self, url_root: &str);

    /// Perform a request and return the response body.
    async fn send(&self, request: ApiRequest) -> Result<String, TransportError>;
}
