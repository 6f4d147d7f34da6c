//! reqwest-backed transport for a live API.
//!
//! Credentials are a pre-issued OAuth 2 bearer token. The interactive
//! authorisation flow that produces the token lives outside this crate;
//! [`HttpTransport::authenticate`](super::Transport::authenticate) only
//! verifies that the configured token is accepted.

use std::{
    cell::{Cell, RefCell},
    time::Duration,
};

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, header::CONTENT_TYPE};
use thiserror::Error;

use super::{ApiRequest, Method, Transport, TransportError};

/// Default API root.
pub const DEFAULT_API_URL: &str = "https://www.openstreetmap.org";

/// Default user agent for API requests.
pub const DEFAULT_USER_AGENT: &str = "waymark/0.1";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const USER_DETAILS_PATH: &str = "/api/0.6/user/details";

/// Error returned when the HTTP client cannot be constructed.
#[derive(Debug, Error)]
pub enum TransportBuildError {
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// API root, e.g. `https://www.openstreetmap.org`.
    pub url_root: String,
    /// Request timeout.
    pub timeout: Duration,
    /// User agent string sent with every request.
    pub user_agent: String,
    /// Bearer token for credentialed requests.
    pub access_token: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            url_root: DEFAULT_API_URL.to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            access_token: None,
        }
    }
}

impl HttpTransportConfig {
    /// Create a configuration for the given API root.
    #[must_use]
    pub fn new(url_root: impl Into<String>) -> Self {
        Self {
            url_root: url_root.into(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the bearer token used for credentialed requests.
    #[must_use]
    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }
}

/// Transport sending requests with `reqwest`.
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
    url_root: RefCell<String>,
    access_token: Option<String>,
    signed_in: Cell<bool>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("client", &self.client)
            .field("timeout", &self.timeout)
            .field("url_root", &self.url_root)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("signed_in", &self.signed_in)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport with default configuration for `url_root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn new(url_root: impl Into<String>) -> Result<Self, TransportBuildError> {
        Self::with_config(HttpTransportConfig::new(url_root))
    }

    /// Create a transport with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn with_config(config: HttpTransportConfig) -> Result<Self, TransportBuildError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()?;
        let signed_in = config.access_token.is_some();
        Ok(Self {
            client,
            timeout: config.timeout,
            url_root: RefCell::new(trim_root(&config.url_root)),
            access_token: config.access_token,
            signed_in: Cell::new(signed_in),
        })
    }

    /// Current API root.
    #[must_use]
    pub fn url_root(&self) -> String {
        self.url_root.borrow().clone()
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.url_root.borrow())
    }

    fn convert_reqwest_error(&self, error: &reqwest::Error, url: &str) -> TransportError {
        if error.is_timeout() {
            return TransportError::Timeout {
                url: url.to_owned(),
                timeout_secs: self.timeout.as_secs(),
            };
        }

        if let Some(status) = error.status() {
            return TransportError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
                message: error.to_string(),
            };
        }

        TransportError::Network {
            url: url.to_owned(),
            message: error.to_string(),
        }
    }
}

fn trim_root(url_root: &str) -> String {
    url_root.trim_end_matches('/').to_owned()
}

#[async_trait(?Send)]
impl Transport for HttpTransport {
    fn authenticated(&self) -> bool {
        self.signed_in.get() && self.access_token.is_some()
    }

    async fn authenticate(&self) -> Result<(), TransportError> {
        if self.access_token.is_none() {
            return Err(TransportError::NotAuthenticated);
        }
        self.signed_in.set(true);
        let verified = self
            .send(ApiRequest::get(USER_DETAILS_PATH).credentialed(true))
            .await;
        if verified.is_err() {
            self.signed_in.set(false);
        }
        verified.map(|_| ())
    }

    fn logout(&self) {
        self.signed_in.set(false);
    }

    fn switch_url_root(&self, url_root: &str) {
        *self.url_root.borrow_mut() = trim_root(url_root);
    }

    async fn send(&self, request: ApiRequest) -> Result<String, TransportError> {
        let url = self.url_for(&request.path);
        debug!("{} {url}", request.method.as_str());

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Put => self.client.put(&url),
            Method::Post => self.client.post(&url),
        };
        if request.credentialed {
            let token = self
                .access_token
                .as_deref()
                .filter(|_| self.signed_in.get())
                .ok_or(TransportError::NotAuthenticated)?;
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, "text/xml").body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, &url))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| self.convert_reqwest_error(&err, &url))?;
        if !status.is_success() {
            return Err(TransportError::Http {
                url,
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}
