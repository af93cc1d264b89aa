//! Audit records and the in-memory trail.
//!
//! This module provides:
//! - `AuditEvent`: the immutable, structured audit record
//! - `Payload`: the disclosed content of an event
//! - `AuditTrail`: an in-memory sink for tests and embedding
//!
//! Events are safe by default: payloads pass through the secret guard
//! before they are attached, and `Display` prints metadata only.

mod event;
mod trail;

pub use event::{AuditEvent, FileInfo, Payload, WriteOperation, FORMAT_VERSION};
pub use trail::AuditTrail;
