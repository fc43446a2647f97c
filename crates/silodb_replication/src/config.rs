//! Replicator configuration.

use crate::error::ConfigError;
use crate::filter::{FilterParams, PushFilter};
use crate::interceptor::HttpInterceptor;
use silodb_core::RevisionStore;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Direction of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local changes are sent to the remote endpoint.
    Push,
    /// Remote changes are fetched into the local datastore.
    Pull,
}

/// Headers the configuration refuses to carry; the transport owns these.
const FORBIDDEN_HEADERS: &[&str] = &[
    "authorization",
    "www-authenticate",
    "host",
    "connection",
    "content-type",
    "accept",
    "content-length",
];

/// Immutable descriptor of one replication session.
///
/// Built with [`push`](ReplicatorConfig::push) or
/// [`pull`](ReplicatorConfig::pull) plus `with_*` builders, then handed to a
/// controller, which copies it defensively; it is read-only from then on.
#[derive(Clone)]
pub struct ReplicatorConfig {
    /// Direction of the session.
    pub direction: Direction,
    /// Handle to the local datastore.
    pub local: Option<Arc<dyn RevisionStore>>,
    /// URL of the remote endpoint.
    pub remote: Option<String>,
    /// Extra HTTP headers, validated before acceptance.
    pub optional_headers: BTreeMap<String, String>,
    /// Remote filter selection (pull) or parameter passthrough (push).
    pub filter_name: Option<String>,
    /// Parameters handed to the filter on every invocation.
    pub filter_params: FilterParams,
    /// Local predicate applied to outgoing revisions; push only.
    pub push_filter: Option<PushFilter>,
    /// Username for cookie-session authentication.
    pub username: Option<String>,
    /// Password for cookie-session authentication.
    pub password: Option<String>,
    /// Ordered interceptor chain. The session-cookie interceptor promoted
    /// from the credentials is appended after these.
    pub http_interceptors: Vec<Arc<dyn HttpInterceptor>>,
}

impl ReplicatorConfig {
    fn new(
        direction: Direction,
        local: Arc<dyn RevisionStore>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            direction,
            local: Some(local),
            remote: Some(remote.into()),
            optional_headers: BTreeMap::new(),
            filter_name: None,
            filter_params: FilterParams::new(),
            push_filter: None,
            username: None,
            password: None,
            http_interceptors: Vec::new(),
        }
    }

    /// Creates a push configuration: `local` → `remote`.
    #[must_use]
    pub fn push(local: Arc<dyn RevisionStore>, remote: impl Into<String>) -> Self {
        Self::new(Direction::Push, local, remote)
    }

    /// Creates a pull configuration: `remote` → `local`.
    #[must_use]
    pub fn pull(local: Arc<dyn RevisionStore>, remote: impl Into<String>) -> Self {
        Self::new(Direction::Pull, local, remote)
    }

    /// Adds an optional HTTP header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.optional_headers.insert(name.into(), value.into());
        self
    }

    /// Selects a named remote filter.
    #[must_use]
    pub fn with_filter(mut self, name: impl Into<String>) -> Self {
        self.filter_name = Some(name.into());
        self
    }

    /// Adds a filter parameter.
    #[must_use]
    pub fn with_filter_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_params.insert(key.into(), value.into());
        self
    }

    /// Sets the local push filter predicate.
    #[must_use]
    pub fn with_push_filter(mut self, filter: PushFilter) -> Self {
        self.push_filter = Some(filter);
        self
    }

    /// Sets credentials; a session-cookie interceptor will be appended to
    /// the interceptor chain when the job is built.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Appends an interceptor to the chain.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn HttpInterceptor>) -> Self {
        self.http_interceptors.push(interceptor);
        self
    }

    /// Validates the optional headers.
    ///
    /// Rejects empty or control-character names and values, and names the
    /// transport reserves for itself.
    pub fn validate_headers(&self) -> Result<(), ConfigError> {
        for (name, value) in &self.optional_headers {
            let reject = |reason| ConfigError::HeaderValidationFailed {
                name: name.clone(),
                reason,
            };
            if name.is_empty() {
                return Err(reject("header name is empty"));
            }
            if name.chars().any(|c| c.is_ascii_control() || c == ' ') {
                return Err(reject("header name contains control characters"));
            }
            if value.chars().any(|c| c.is_ascii_control()) {
                return Err(reject("header value contains control characters"));
            }
            if FORBIDDEN_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                return Err(reject("header is reserved for the transport"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ReplicatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicatorConfig")
            .field("direction", &self.direction)
            .field("remote", &self.remote)
            .field("filter_name", &self.filter_name)
            .field("has_credentials", &self.username.is_some())
            .field("interceptors", &self.http_interceptors.len())
            .finish_non_exhaustive()
    }
}
