//! Pluggable audit event destinations.

use std::io::{self, Write};

use thiserror::Error;

use crate::audit::AuditEvent;

/// Error returned when a sink fails to deliver an event.
///
/// Delivery errors are counted and logged by the emitter; they never reach
/// the request that produced the event.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing to the destination failed.
    #[error("audit sink I/O error: {0}")]
    Io(#[from] io::Error),

    /// The event could not be serialized.
    #[error("audit event could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The destination refused the event.
    #[error("audit sink rejected the event: {0}")]
    Rejected(String),
}

/// Destination for audit events.
///
/// A sink is owned by the emitter's writer thread, so it only needs to be
/// `Send`. Implementations for remote transports (webhook, index) live
/// outside this crate.
///
/// # Examples
///
/// ```
/// use compliance_audit::audit::AuditEvent;
/// use compliance_audit::sink::{AuditSink, SinkError};
///
/// struct Counting(usize);
///
/// impl AuditSink for Counting {
///     fn deliver(&mut self, _event: &AuditEvent) -> Result<(), SinkError> {
///         self.0 += 1;
///         Ok(())
///     }
/// }
/// ```
pub trait AuditSink: Send {
    /// Delivers one event.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if the event could not be delivered.
    fn deliver(&mut self, event: &AuditEvent) -> Result<(), SinkError>;

    /// Flushes buffered events, if the sink buffers.
    ///
    /// # Errors
    ///
    /// Returns `SinkError` if buffered events could not be written.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: AuditSink + ?Sized> AuditSink for Box<S> {
    fn deliver(&mut self, event: &AuditEvent) -> Result<(), SinkError> {
        (**self).deliver(event)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Writes events as structured `tracing` records under the `audit` target.
///
/// The JSON record goes into the `record` field so a subscriber can route
/// the `audit` target to its own file.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn deliver(&mut self, event: &AuditEvent) -> Result<(), SinkError> {
        let record = serde_json::to_string(&event.to_json())?;
        tracing::info!(
            target: "audit",
            category = %event.category(),
            request_id = %event.request_id(),
            index = event.index().unwrap_or(""),
            record = %record,
            "audit event"
        );
        Ok(())
    }
}

/// Writes one JSON record per line to any writer.
#[derive(Debug)]
pub struct WriterSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the inner writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> AuditSink for WriterSink<W> {
    fn deliver(&mut self, event: &AuditEvent) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &event.to_json())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::Category;
    use crate::context::{Origin, RequestContext};

    fn event() -> AuditEvent {
        AuditEvent::new(
            Category::ComplianceDocRead,
            &RequestContext::new("req-1", Origin::Rest),
        )
        .with_index("emp")
    }

    #[test]
    fn writer_sink_writes_json_lines() {
        let mut sink = WriterSink::new(Vec::new());

        sink.deliver(&event()).unwrap();
        sink.deliver(&event()).unwrap();
        sink.flush().unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["audit_category"], "COMPLIANCE_DOC_READ");
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_errors_surface_as_sink_errors() {
        let mut sink = WriterSink::new(Broken);
        let err = sink.deliver(&event()).unwrap_err();
        assert!(matches!(err, SinkError::Io(_) | SinkError::Serialize(_)));
    }

    #[test]
    fn log_sink_accepts_events() {
        let mut sink = LogSink;
        sink.deliver(&event()).unwrap();
    }

    #[test]
    fn boxed_sinks_delegate() {
        let mut sink: Box<dyn AuditSink> = Box::new(WriterSink::new(Vec::new()));
        sink.deliver(&event()).unwrap();
        sink.flush().unwrap();
    }

    #[test]
    fn error_messages() {
        assert!(SinkError::Rejected("quota".into())
            .to_string()
            .contains("quota"));
    }
}
