//! In-memory audit trail.
//!
//! The trail is a cloneable handle: give one clone to the emitter as its
//! sink and keep another to inspect what was delivered.

use std::sync::{Arc, Mutex, MutexGuard};

use super::AuditEvent;
use crate::sink::{AuditSink, SinkError};

/// Shared in-memory recorder for audit events.
///
/// # Example
///
/// ```
/// use compliance_audit::audit::{AuditEvent, AuditTrail};
/// use compliance_audit::sink::AuditSink;
/// use compliance_audit::{Category, Origin, RequestContext};
///
/// let trail = AuditTrail::new();
/// let mut sink = trail.clone();
///
/// let ctx = RequestContext::new("req-123", Origin::Rest);
/// sink.deliver(&AuditEvent::new(Category::FailedLogin, &ctx)).unwrap();
///
/// assert_eq!(trail.len(), 1);
/// assert!(trail.contains("FAILED_LOGIN"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl AuditTrail {
    /// Creates a new empty audit trail.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records an audit event.
    pub fn record(&self, event: AuditEvent) {
        self.lock().push(event);
    }

    /// Returns a snapshot of all recorded events, in delivery order.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.lock().clone()
    }

    /// Returns the JSON records of all events.
    pub fn records(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.to_json().to_string()).collect()
    }

    /// Returns `true` if any JSON record contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.records().iter().any(|r| r.contains(needle))
    }

    /// Returns the number of recorded events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clears all recorded events.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl AuditSink for AuditTrail {
    fn deliver(&mut self, event: &AuditEvent) -> Result<(), SinkError> {
        self.record(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::context::{Origin, RequestContext};

    fn event(request_id: &str, category: Category) -> AuditEvent {
        AuditEvent::new(category, &RequestContext::new(request_id, Origin::Rest))
    }

    #[test]
    fn audit_trail_starts_empty() {
        let trail = AuditTrail::new();
        assert!(trail.is_empty());
        assert_eq!(trail.len(), 0);
    }

    #[test]
    fn clones_share_events() {
        let trail = AuditTrail::new();
        let mut sink = trail.clone();

        sink.deliver(&event("req-1", Category::FailedLogin)).unwrap();
        sink.deliver(&event("req-2", Category::MissingPrivileges))
            .unwrap();

        let events = trail.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].request_id(), "req-1");
        assert_eq!(events[1].request_id(), "req-2");
        assert!(trail.contains("MISSING_PRIVILEGES"));
    }

    #[test]
    fn audit_trail_can_be_cleared() {
        let trail = AuditTrail::new();
        trail.record(event("req-1", Category::SslException));
        assert_eq!(trail.len(), 1);

        trail.clear();

        assert!(trail.is_empty());
        assert!(!trail.contains("SSL_EXCEPTION"));
    }
}
