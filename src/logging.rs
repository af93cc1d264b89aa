use std::fmt;

/// A request-scoped logging handle.
///
/// `RequestLog` is obtained from [`RequestContext::log`](crate::RequestContext::log)
/// and is lifetime-bound to the context, so every message it writes carries
/// the same request id as the audit events produced for that request.
///
/// Messages go to the crate's diagnostic log, never to the audit sink.
#[derive(Debug)]
pub struct RequestLog<'a> {
    request_id: &'a str,
}

impl<'a> RequestLog<'a> {
    pub(crate) fn new(request_id: &'a str) -> Self {
        Self { request_id }
    }

    /// Returns the request ID associated with this logger.
    pub fn request_id(&self) -> &str {
        self.request_id
    }

    /// Logs an info-level message with request ID.
    ///
    /// Use with `format_args!`:
    /// ```
    /// # use compliance_audit::{Origin, RequestContext};
    /// let ctx = RequestContext::new("req-1", Origin::Rest);
    /// ctx.log().info(format_args!("installed config v{}", 2));
    /// ```
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(request_id = %self.request_id, "{}", args);
    }

    /// Logs a warning-level message with request ID.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(request_id = %self.request_id, "{}", args);
    }

    /// Logs a debug-level message with request ID.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(request_id = %self.request_id, "{}", args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_log_carries_request_id() {
        let log = RequestLog::new("req-42");
        assert_eq!(log.request_id(), "req-42");
        log.debug(format_args!("dropped {}", "COMPLIANCE_DOC_READ"));
    }
}
