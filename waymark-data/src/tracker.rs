//! Server-advertised imagery blacklists and the latched rate-limit state.

use std::fmt;

use log::warn;
use regex::Regex;

use crate::transport::TransportError;

/// Blacklist applied before the server advertises its own: Google tile
/// endpoints.
pub const DEFAULT_BLACKLIST: &str = r".*\.google(apis)?\..*/(vt|kh)[\?/].*([xyz]=.*){3}.*";

/// Reported state of the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiStatus {
    /// Reads and writes are accepted.
    Online,
    /// Only reads are accepted.
    ReadOnly,
    /// The API is down.
    Offline,
    /// Any other value reported by the server.
    Other(String),
}

impl ApiStatus {
    /// Parse the `api` attribute of a capabilities response.
    #[must_use]
    pub fn from_api(value: &str) -> Self {
        match value {
            "online" => Self::Online,
            "readonly" => Self::ReadOnly,
            "offline" => Self::Offline,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => f.write_str("online"),
            Self::ReadOnly => f.write_str("readonly"),
            Self::Offline => f.write_str("offline"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// Imagery blacklist plus the first rate-limit failure of the session.
#[derive(Debug)]
pub struct Tracker {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
    rate_limit: Option<TransportError>,
}

impl Default for Tracker {
    fn default() -> Self {
        let mut tracker = Self {
            patterns: Vec::new(),
            compiled: Vec::new(),
            rate_limit: None,
        };
        tracker.replace_blacklists(vec![DEFAULT_BLACKLIST.to_owned()]);
        tracker
    }
}

impl Tracker {
    /// Current blacklist patterns as advertised.
    #[must_use]
    pub fn blacklists(&self) -> &[String] {
        &self.patterns
    }

    /// Replace the blacklist wholesale. An empty list leaves the current one
    /// in place. Patterns that fail to compile are kept in the advertised
    /// list but never match.
    pub fn replace_blacklists(&mut self, patterns: Vec<String>) {
        if patterns.is_empty() {
            return;
        }
        self.compiled = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    warn!("skipping invalid imagery blacklist {pattern:?}: {err}");
                    None
                }
            })
            .collect();
        self.patterns = patterns;
    }

    /// Whether `url` matches any blacklist pattern.
    #[must_use]
    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.compiled.iter().any(|regex| regex.is_match(url))
    }

    /// Latched rate-limit failure, if any.
    #[must_use]
    pub const fn rate_limit(&self) -> Option<&TransportError> {
        self.rate_limit.as_ref()
    }

    /// Record a rate-limit failure. Returns `false` when one was already
    /// latched.
    pub fn latch_rate_limit(&mut self, error: TransportError) -> bool {
        if self.rate_limit.is_some() {
            return false;
        }
        warn!("API rate limit reached: {error}");
        self.rate_limit = Some(error);
        true
    }

    /// Forget the latched rate-limit failure.
    pub fn clear_rate_limit(&mut self) {
        self.rate_limit = None;
    }
}
