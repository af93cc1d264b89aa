//! Asynchronous event delivery.
//!
//! [`AuditEmitter::emit`] never blocks the calling request: events go into a
//! bounded channel and a dedicated writer thread owns the sink. When the
//! channel is full the oldest queued event is dropped to make room. Every
//! emitted event ends in exactly one counter of [`EmitterStats`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::audit::AuditEvent;
use crate::error::Error;
use crate::sink::AuditSink;

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Default time an event may wait in the queue.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed to drain the queue when an emitter is dropped.
const DROP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Emitter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterConfig {
    /// Maximum number of queued events.
    pub capacity: usize,
    /// Events queued longer than this are dropped instead of delivered.
    /// `None` disables the timeout.
    pub delivery_timeout: Option<Duration>,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            delivery_timeout: Some(DEFAULT_DELIVERY_TIMEOUT),
        }
    }
}

/// Point-in-time delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterStats {
    /// Events handed to `emit`.
    pub emitted: u64,
    /// Events the sink accepted.
    pub delivered: u64,
    /// Events dropped because the queue was full.
    pub dropped_overflow: u64,
    /// Events dropped after waiting longer than the delivery timeout.
    pub dropped_timeout: u64,
    /// Events dropped because the emitter was shutting down.
    pub dropped_closed: u64,
    /// Events the sink failed to deliver.
    pub sink_failures: u64,
}

impl EmitterStats {
    /// Events that reached a final state.
    pub fn handled(&self) -> u64 {
        self.delivered
            + self.dropped_overflow
            + self.dropped_timeout
            + self.dropped_closed
            + self.sink_failures
    }
}

struct Envelope {
    event: AuditEvent,
    queued_at: Instant,
}

#[derive(Default)]
struct Shared {
    emitted: AtomicU64,
    delivered: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_timeout: AtomicU64,
    dropped_closed: AtomicU64,
    sink_failures: AtomicU64,
    abandon: AtomicBool,
    handled: Mutex<u64>,
    progress: Condvar,
}

impl Shared {
    fn finish(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
        let mut handled = self.handled.lock().unwrap_or_else(|p| p.into_inner());
        *handled += 1;
        self.progress.notify_all();
    }

    fn stats(&self) -> EmitterStats {
        EmitterStats {
            emitted: self.emitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            dropped_timeout: self.dropped_timeout.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
        }
    }
}

/// Bounded, non-blocking audit event queue with a dedicated writer thread.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use compliance_audit::audit::{AuditEvent, AuditTrail};
/// use compliance_audit::emit::{AuditEmitter, EmitterConfig};
/// use compliance_audit::{Category, Origin, RequestContext};
///
/// let trail = AuditTrail::new();
/// let emitter = AuditEmitter::start(trail.clone(), EmitterConfig::default()).unwrap();
///
/// let ctx = RequestContext::new("req-1", Origin::Rest);
/// emitter.emit(AuditEvent::new(Category::FailedLogin, &ctx));
///
/// assert!(emitter.flush(Duration::from_secs(5)));
/// assert_eq!(trail.len(), 1);
/// ```
pub struct AuditEmitter {
    tx: Option<Sender<Envelope>>,
    oldest: Receiver<Envelope>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AuditEmitter {
    /// Starts the writer thread that owns `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if the thread cannot be started.
    pub fn start<S>(sink: S, config: EmitterConfig) -> Result<Self, Error>
    where
        S: AuditSink + 'static,
    {
        let (tx, rx) = bounded(config.capacity.max(1));
        let shared = Arc::new(Shared::default());
        let oldest = rx.clone();

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("audit-emitter".to_string())
            .spawn(move || run_worker(sink, rx, worker_shared, config.delivery_timeout))
            .map_err(Error::Spawn)?;

        Ok(Self {
            tx: Some(tx),
            oldest,
            shared,
            worker: Some(worker),
        })
    }

    /// Queues an event without blocking.
    ///
    /// If the queue is full the oldest queued event is dropped and counted.
    pub fn emit(&self, event: AuditEvent) {
        self.shared.emitted.fetch_add(1, Ordering::Relaxed);
        let Some(tx) = &self.tx else {
            self.shared.finish(&self.shared.dropped_closed);
            return;
        };

        let envelope = Envelope {
            event,
            queued_at: Instant::now(),
        };
        let envelope = match tx.try_send(envelope) {
            Ok(()) => return,
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!("audit emitter worker is gone; event dropped");
                self.shared.finish(&self.shared.dropped_closed);
                return;
            }
            Err(TrySendError::Full(envelope)) => envelope,
        };

        if let Ok(evicted) = self.oldest.try_recv() {
            tracing::warn!(
                request_id = %evicted.event.request_id(),
                category = %evicted.event.category(),
                "audit queue full; dropped oldest event"
            );
            self.shared.finish(&self.shared.dropped_overflow);
        }
        if let Err(err) = tx.try_send(envelope) {
            let dropped = err.into_inner();
            tracing::warn!(
                request_id = %dropped.event.request_id(),
                "audit queue still full; dropped event"
            );
            self.shared.finish(&self.shared.dropped_overflow);
        }
    }

    /// Waits until every event emitted before this call has been handled.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn flush(&self, timeout: Duration) -> bool {
        let target = self.shared.emitted.load(Ordering::Relaxed);
        let handled = self.shared.handled.lock().unwrap_or_else(|p| p.into_inner());
        let (handled, _) = self
            .shared
            .progress
            .wait_timeout_while(handled, timeout, |h| *h < target)
            .unwrap_or_else(|p| p.into_inner());
        *handled >= target
    }

    /// Current counters.
    pub fn stats(&self) -> EmitterStats {
        self.shared.stats()
    }

    /// Drains the queue for at most `timeout`, stops the writer thread and
    /// returns the final counters. Events still queued after the timeout
    /// are dropped and counted.
    pub fn shutdown(mut self, timeout: Duration) -> EmitterStats {
        self.close(timeout);
        self.shared.stats()
    }

    fn close(&mut self, timeout: Duration) {
        if self.tx.is_none() {
            return;
        }
        let drained = self.flush(timeout);
        if !drained {
            tracing::warn!("audit emitter did not drain in {:?}; dropping the rest", timeout);
            self.shared.abandon.store(true, Ordering::Relaxed);
            while self.oldest.try_recv().is_ok() {
                self.shared.finish(&self.shared.dropped_closed);
            }
        }
        self.tx.take();
        let Some(worker) = self.worker.take() else {
            return;
        };
        if drained {
            if worker.join().is_err() {
                tracing::warn!("audit emitter worker panicked");
            }
        } else {
            // The sink is stuck in a delivery; the thread exits once it returns.
            tracing::warn!("detaching audit emitter worker");
            drop(worker);
        }
    }
}

impl Drop for AuditEmitter {
    fn drop(&mut self) {
        self.close(DROP_DRAIN_TIMEOUT);
    }
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter")
            .field("stats", &self.stats())
            .field("open", &self.tx.is_some())
            .finish()
    }
}

fn run_worker<S: AuditSink>(
    mut sink: S,
    rx: Receiver<Envelope>,
    shared: Arc<Shared>,
    delivery_timeout: Option<Duration>,
) {
    tracing::debug!("audit emitter started");
    for envelope in rx.iter() {
        if shared.abandon.load(Ordering::Relaxed) {
            shared.finish(&shared.dropped_closed);
            continue;
        }
        if delivery_timeout.is_some_and(|t| envelope.queued_at.elapsed() > t) {
            tracing::warn!(
                request_id = %envelope.event.request_id(),
                "audit event exceeded delivery timeout; dropped"
            );
            shared.finish(&shared.dropped_timeout);
            continue;
        }

        let result = sink.deliver(&envelope.event);
        if rx.is_empty() {
            if let Err(err) = sink.flush() {
                tracing::warn!(error = %err, "audit sink flush failed");
            }
        }
        match result {
            Ok(()) => shared.finish(&shared.delivered),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    request_id = %envelope.event.request_id(),
                    category = %envelope.event.category(),
                    "audit sink failed to deliver event"
                );
                shared.finish(&shared.sink_failures);
            }
        }
    }
    if let Err(err) = sink.flush() {
        tracing::warn!(error = %err, "audit sink flush failed");
    }
    tracing::debug!("audit emitter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTrail;
    use crate::category::Category;
    use crate::context::{Origin, RequestContext};
    use crate::sink::SinkError;

    const WAIT: Duration = Duration::from_secs(5);

    fn event(request_id: &str) -> AuditEvent {
        AuditEvent::new(
            Category::ComplianceDocWrite,
            &RequestContext::new(request_id, Origin::Rest),
        )
    }

    /// Records events, but blocks each delivery until the gate releases it.
    struct GatedSink {
        started: Sender<()>,
        gate: Receiver<()>,
        trail: AuditTrail,
    }

    impl AuditSink for GatedSink {
        fn deliver(&mut self, event: &AuditEvent) -> Result<(), SinkError> {
            let _ = self.started.send(());
            let _ = self.gate.recv();
            self.trail.record(event.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn deliver(&mut self, _event: &AuditEvent) -> Result<(), SinkError> {
            Err(SinkError::Rejected("read only".to_string()))
        }
    }

    fn gated(config: EmitterConfig) -> (AuditEmitter, Receiver<()>, Sender<()>, AuditTrail) {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (gate_tx, gate_rx) = crossbeam_channel::unbounded();
        let trail = AuditTrail::new();
        let sink = GatedSink {
            started: started_tx,
            gate: gate_rx,
            trail: trail.clone(),
        };
        let emitter = AuditEmitter::start(sink, config).unwrap();
        (emitter, started_rx, gate_tx, trail)
    }

    #[test]
    fn delivers_in_order() {
        let trail = AuditTrail::new();
        let emitter = AuditEmitter::start(trail.clone(), EmitterConfig::default()).unwrap();

        for i in 0..10 {
            emitter.emit(event(&format!("req-{i}")));
        }

        assert!(emitter.flush(WAIT));
        let ids: Vec<String> = trail
            .events()
            .iter()
            .map(|e| e.request_id().to_string())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("req-{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(emitter.stats().delivered, 10);
    }

    #[test]
    fn overflow_drops_oldest() {
        let (emitter, started, gate, trail) = gated(EmitterConfig {
            capacity: 2,
            delivery_timeout: None,
        });

        emitter.emit(event("req-1"));
        started.recv_timeout(WAIT).unwrap();

        for id in ["req-2", "req-3", "req-4", "req-5"] {
            emitter.emit(event(id));
        }
        drop(gate);

        assert!(emitter.flush(WAIT));
        let stats = emitter.stats();
        assert_eq!(stats.emitted, 5);
        assert_eq!(stats.dropped_overflow, 2);
        assert_eq!(stats.delivered, 3);
        let ids: Vec<String> = trail
            .events()
            .iter()
            .map(|e| e.request_id().to_string())
            .collect();
        assert_eq!(ids, vec!["req-1", "req-4", "req-5"]);
    }

    #[test]
    fn stale_events_time_out() {
        let (emitter, started, gate, trail) = gated(EmitterConfig {
            capacity: 8,
            delivery_timeout: Some(Duration::from_millis(20)),
        });

        emitter.emit(event("req-1"));
        started.recv_timeout(WAIT).unwrap();
        emitter.emit(event("req-2"));
        std::thread::sleep(Duration::from_millis(100));
        drop(gate);

        assert!(emitter.flush(WAIT));
        let stats = emitter.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped_timeout, 1);
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn sink_failures_are_counted_not_propagated() {
        let emitter = AuditEmitter::start(FailingSink, EmitterConfig::default()).unwrap();
        emitter.emit(event("req-1"));
        emitter.emit(event("req-2"));

        assert!(emitter.flush(WAIT));
        let stats = emitter.stats();
        assert_eq!(stats.sink_failures, 2);
        assert_eq!(stats.handled(), stats.emitted);
    }

    #[test]
    fn flush_times_out_while_sink_is_stuck() {
        let (emitter, started, gate, _trail) = gated(EmitterConfig::default());
        emitter.emit(event("req-1"));
        started.recv_timeout(WAIT).unwrap();

        assert!(!emitter.flush(Duration::from_millis(20)));

        drop(gate);
        assert!(emitter.flush(WAIT));
    }

    #[test]
    fn shutdown_drains_queue() {
        let trail = AuditTrail::new();
        let emitter = AuditEmitter::start(trail.clone(), EmitterConfig::default()).unwrap();
        for i in 0..3 {
            emitter.emit(event(&format!("req-{i}")));
        }

        let stats = emitter.shutdown(WAIT);

        assert_eq!(stats.delivered, 3);
        assert_eq!(trail.len(), 3);
    }

    #[test]
    fn shutdown_does_not_wait_on_stuck_sink() {
        let (emitter, started, gate, trail) = gated(EmitterConfig::default());
        emitter.emit(event("req-1"));
        started.recv_timeout(WAIT).unwrap();
        emitter.emit(event("req-2"));
        emitter.emit(event("req-3"));

        let begun = Instant::now();
        let stats = emitter.shutdown(Duration::from_millis(50));

        assert!(begun.elapsed() < Duration::from_secs(2));
        assert_eq!(stats.dropped_closed, 2);
        assert_eq!(stats.delivered, 0);
        drop(gate);
        assert!(trail.len() <= 1);
    }

    #[test]
    fn flush_with_nothing_emitted() {
        let emitter = AuditEmitter::start(AuditTrail::new(), EmitterConfig::default()).unwrap();
        assert!(emitter.flush(Duration::from_millis(1)));
        assert_eq!(emitter.stats(), EmitterStats::default());
    }
}
