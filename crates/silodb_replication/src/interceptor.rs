//! HTTP interceptors.
//!
//! Interceptors are request/response mutators the transport runs in order
//! around every HTTP call. The replication layer only defines the chain and
//! the session-cookie interceptor that credential promotion appends; the
//! transport drives them.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Mutable view of one HTTP exchange handed to interceptors.
#[derive(Debug, Clone, Default)]
pub struct InterceptorContext {
    /// Request URL.
    pub url: String,
    /// Request headers; interceptors may add or replace entries.
    pub request_headers: BTreeMap<String, String>,
    /// Response status; `None` during the request phase.
    pub response_status: Option<u16>,
    /// Set by a response interceptor to ask the transport to replay the
    /// request once.
    pub should_retry: bool,
}

impl InterceptorContext {
    /// Creates a request-phase context for `url`.
    #[must_use]
    pub fn request(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// A request/response mutator in the transport's interceptor chain.
///
/// Both hooks default to no-ops so implementations override only the phase
/// they care about.
pub trait HttpInterceptor: Send + Sync {
    /// Runs before the request is sent.
    fn intercept_request(&self, ctx: &mut InterceptorContext) {
        let _ = ctx;
    }

    /// Runs after the response arrives.
    fn intercept_response(&self, ctx: &mut InterceptorContext) {
        let _ = ctx;
    }
}

/// Minimal percent-encoding for form bodies; everything outside the
/// unreserved set is escaped.
fn form_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Cookie-based session authentication.
///
/// Appended to the interceptor chain automatically when a configuration
/// carries credentials. Holds the form-encoded credential body for the
/// `_session` request, caches the cookie it yields, and attaches it to
/// outgoing requests. A 401 or 403 response drops the cached cookie and
/// requests one replay; repeated authentication failures latch the
/// interceptor off so it stops hammering the session endpoint.
pub struct SessionCookieInterceptor {
    session_request_body: String,
    cookie: RwLock<Option<String>>,
    should_make_session_request: AtomicBool,
}

impl SessionCookieInterceptor {
    /// Creates an interceptor for the given credentials.
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            session_request_body: format!(
                "name={}&password={}",
                form_encode(username),
                form_encode(password)
            ),
            cookie: RwLock::new(None),
            should_make_session_request: AtomicBool::new(true),
        }
    }

    /// Returns the form-encoded body for the session request.
    #[must_use]
    pub fn session_request_body(&self) -> &str {
        &self.session_request_body
    }

    /// Returns true while session requests still look worthwhile.
    #[must_use]
    pub fn should_make_session_request(&self) -> bool {
        self.should_make_session_request.load(Ordering::SeqCst)
    }

    /// Stores a cookie obtained from the session endpoint.
    pub fn store_cookie(&self, cookie: impl Into<String>) {
        *self.cookie.write() = Some(cookie.into());
    }

    /// Returns the cached cookie, if any.
    #[must_use]
    pub fn cookie(&self) -> Option<String> {
        self.cookie.read().clone()
    }
}

impl HttpInterceptor for SessionCookieInterceptor {
    fn intercept_request(&self, ctx: &mut InterceptorContext) {
        if let Some(cookie) = self.cookie() {
            ctx.request_headers.insert("Cookie".into(), cookie);
        }
    }

    fn intercept_response(&self, ctx: &mut InterceptorContext) {
        if matches!(ctx.response_status, Some(401) | Some(403)) {
            let had_cookie = self.cookie.write().take().is_some();
            if had_cookie {
                // The cookie expired; replay once with a fresh session.
                ctx.should_retry = true;
            } else {
                // Credentials themselves were rejected.
                self.should_make_session_request
                    .store(false, Ordering::SeqCst);
                tracing::warn!(url = %ctx.url, "session authentication rejected");
            }
        }
    }
}
