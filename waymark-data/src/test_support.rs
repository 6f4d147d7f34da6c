//! Test doubles for driving an [`OsmSession`](crate::OsmSession) without a
//! network.
//!
//! [`StubTransport`] answers requests from scripted replies matched by verb
//! and path prefix, logs every request it sees, and counts logouts. Replies
//! can be held back and released later to interleave overlapping requests.
//!
//! ```
//! use waymark_data::{
//!     ApiStatus, Method, OsmSession, SessionConfig,
//!     test_support::{StubTransport, block_on_local},
//! };
//!
//! let transport = StubTransport::new();
//! transport.reply(
//!     Method::Get,
//!     "/api/capabilities",
//!     r#"<osm><api><status api="online"/></api></osm>"#,
//! );
//! let session = OsmSession::new(transport, SessionConfig::default());
//! let status = block_on_local(session.status()).expect("status should load");
//! assert_eq!(status, ApiStatus::Online);
//! ```

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    future::Future,
};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::transport::{ApiRequest, Method, Transport, TransportError};

type Outcome = Result<String, TransportError>;

#[derive(Debug)]
enum Reply {
    Ready(Outcome),
    Held(oneshot::Receiver<Outcome>),
}

#[derive(Debug)]
struct Rule {
    method: Method,
    prefix: String,
    replies: VecDeque<Reply>,
}

/// A reply that has been scripted but not yet delivered.
#[derive(Debug)]
pub struct HeldReply {
    sender: oneshot::Sender<Outcome>,
}

impl HeldReply {
    /// Deliver a successful body.
    pub fn release(self, body: impl Into<String>) {
        // The request may already have been aborted.
        let _ = self.sender.send(Ok(body.into()));
    }

    /// Deliver a failure.
    pub fn fail(self, error: TransportError) {
        let _ = self.sender.send(Err(error));
    }
}

/// Scripted [`Transport`] for tests.
///
/// Each scripted reply answers one request. Requests with no matching reply
/// fail with a `404`.
#[derive(Debug, Default)]
pub struct StubTransport {
    rules: RefCell<Vec<Rule>>,
    requests: RefCell<Vec<ApiRequest>>,
    signed_in: Cell<bool>,
    reject_authentication: Cell<bool>,
    logouts: Cell<usize>,
    url_roots: RefCell<Vec<String>>,
}

impl StubTransport {
    /// Anonymous transport with no scripted replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start out holding credentials.
    #[must_use]
    pub fn signed_in(self) -> Self {
        self.signed_in.set(true);
        self
    }

    /// Make the next [`Transport::authenticate`] calls fail.
    pub fn reject_authentication(&self, reject: bool) {
        self.reject_authentication.set(reject);
    }

    /// Answer the next matching request with `body`.
    pub fn reply(&self, method: Method, prefix: &str, body: impl Into<String>) {
        self.push(method, prefix, Reply::Ready(Ok(body.into())));
    }

    /// Answer the next matching request with `error`.
    pub fn fail(&self, method: Method, prefix: &str, error: TransportError) {
        self.push(method, prefix, Reply::Ready(Err(error)));
    }

    /// Answer the next matching request with an HTTP failure status.
    pub fn fail_status(&self, method: Method, prefix: &str, status: u16) {
        let error = TransportError::Http {
            url: format!("https://api.example.test{prefix}"),
            status,
            message: String::new(),
        };
        self.fail(method, prefix, error);
    }

    /// Hold the next matching request until the returned handle is used.
    #[must_use]
    pub fn hold(&self, method: Method, prefix: &str) -> HeldReply {
        let (sender, receiver) = oneshot::channel();
        self.push(method, prefix, Reply::Held(receiver));
        HeldReply { sender }
    }

    /// Every request sent so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.borrow().clone()
    }

    /// Paths of every request sent so far, in order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.path.clone())
            .collect()
    }

    /// Number of requests whose path starts with `prefix`.
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.requests
            .borrow()
            .iter()
            .filter(|request| request.path.starts_with(prefix))
            .count()
    }

    /// Number of times the credentials were dropped.
    #[must_use]
    pub fn logouts(&self) -> usize {
        self.logouts.get()
    }

    /// URL roots passed to [`Transport::switch_url_root`].
    #[must_use]
    pub fn url_roots(&self) -> Vec<String> {
        self.url_roots.borrow().clone()
    }

    fn push(&self, method: Method, prefix: &str, reply: Reply) {
        let mut rules = self.rules.borrow_mut();
        if let Some(rule) = rules
            .iter_mut()
            .find(|rule| rule.method == method && rule.prefix == prefix)
        {
            rule.replies.push_back(reply);
            return;
        }
        rules.push(Rule {
            method,
            prefix: prefix.to_owned(),
            replies: VecDeque::from([reply]),
        });
    }

    fn next_reply(&self, request: &ApiRequest) -> Option<Reply> {
        let mut rules = self.rules.borrow_mut();
        rules
            .iter_mut()
            .filter(|rule| {
                rule.method == request.method
                    && request.path.starts_with(&rule.prefix)
                    && !rule.replies.is_empty()
            })
            .max_by_key(|rule| rule.prefix.len())
            .and_then(|rule| rule.replies.pop_front())
    }
}

#[async_trait(?Send)]
impl Transport for StubTransport {
    fn authenticated(&self) -> bool {
        self.signed_in.get()
    }

    async fn authenticate(&self) -> Result<(), TransportError> {
        if self.reject_authentication.get() {
            return Err(TransportError::NotAuthenticated);
        }
        self.signed_in.set(true);
        Ok(())
    }

    fn logout(&self) {
        self.signed_in.set(false);
        self.logouts.set(self.logouts.get() + 1);
    }

    fn switch_url_root(&self, url_root: &str) {
        self.url_roots.borrow_mut().push(url_root.to_owned());
    }

    async fn send(&self, request: ApiRequest) -> Result<String, TransportError> {
        self.requests.borrow_mut().push(request.clone());
        match self.next_reply(&request) {
            Some(Reply::Ready(outcome)) => outcome,
            Some(Reply::Held(receiver)) => {
                receiver.await.unwrap_or_else(|_| {
                    Err(TransportError::Network {
                        url: request.path.clone(),
                        message: "held reply dropped".to_owned(),
                    })
                })
            }
            None => Err(TransportError::Http {
                url: request.path,
                status: 404,
                message: "no scripted reply".to_owned(),
            }),
        }
    }
}

/// Run `future` to completion on a current-thread runtime inside a
/// [`tokio::task::LocalSet`], so it may spawn local tasks.
///
/// # Panics
///
/// Panics if the runtime cannot be built.
pub fn block_on_local<F: Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime should build");
    tokio::task::LocalSet::new().block_on(&runtime, future)
}
