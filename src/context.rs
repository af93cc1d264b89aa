use std::fmt;

use serde::Serialize;

use crate::logging::RequestLog;

/// Layer an intercepted call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    /// HTTP/REST layer.
    Rest,
    /// Internal node-to-node transport.
    Transport,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Rest => f.write_str("REST"),
            Origin::Transport => f.write_str("TRANSPORT"),
        }
    }
}

/// Metadata of the request an audit event is produced for.
///
/// Supplied by the transport/REST collaborator. One context is shared by
/// every event a request produces, including all items of a bulk or
/// multi-search request.
///
/// # Examples
///
/// ```
/// use compliance_audit::{Origin, RequestContext};
///
/// let ctx = RequestContext::new("req-123", Origin::Rest)
///     .with_user("admin")
///     .with_action("indices:data/read/search");
///
/// assert_eq!(ctx.request_id(), "req-123");
/// assert_eq!(ctx.effective_user(), Some("admin"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: String,
    origin: Origin,
    effective_user: Option<String>,
    action: Option<String>,
    remote_address: Option<String>,
}

impl RequestContext {
    /// Creates a context with only a request id and origin.
    pub fn new(request_id: impl Into<String>, origin: Origin) -> Self {
        Self {
            request_id: request_id.into(),
            origin,
            effective_user: None,
            action: None,
            remote_address: None,
        }
    }

    /// Sets the effective (possibly impersonated) user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.effective_user = Some(user.into());
        self
    }

    /// Sets the transport action or REST path.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets the caller's address.
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    /// Returns the request identifier.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Returns the origin layer.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Returns the effective user, if authenticated.
    pub fn effective_user(&self) -> Option<&str> {
        self.effective_user.as_deref()
    }

    /// Returns the action or path, if known.
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Returns the caller's address, if known.
    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    /// Returns a logger that tags every message with this request's id.
    pub fn log(&self) -> RequestLog<'_> {
        RequestLog::new(&self.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builder() {
        let ctx = RequestContext::new("req-1", Origin::Transport)
            .with_user("kirk")
            .with_action("indices:data/write/bulk")
            .with_remote_address("10.0.0.7");

        assert_eq!(ctx.request_id(), "req-1");
        assert_eq!(ctx.origin(), Origin::Transport);
        assert_eq!(ctx.effective_user(), Some("kirk"));
        assert_eq!(ctx.action(), Some("indices:data/write/bulk"));
        assert_eq!(ctx.remote_address(), Some("10.0.0.7"));
    }

    #[test]
    fn anonymous_context() {
        let ctx = RequestContext::new("req-anon", Origin::Rest);
        assert!(ctx.effective_user().is_none());
        assert!(ctx.action().is_none());
    }

    #[test]
    fn log_is_bound_to_request_id() {
        let ctx = RequestContext::new("req-log", Origin::Rest);
        assert_eq!(ctx.log().request_id(), "req-log");
    }

    #[test]
    fn origin_display_and_serialize() {
        assert_eq!(Origin::Rest.to_string(), "REST");
        assert_eq!(
            serde_json::to_string(&Origin::Transport).unwrap(),
            "\"TRANSPORT\""
        );
    }
}
