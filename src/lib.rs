//! Compliance audit-event engine for a data-access security layer.
//!
//! For every read and write against watched data this crate decides whether
//! the operation is in scope, discloses only the configured fields, computes
//! before/after diffs for updates, scrubs credential material, and hands a
//! structured, categorized record to a pluggable sink off the request thread.
//!
//! # Core Types
//!
//! - [`AuditSettings`] / [`AuditConfig`]: serializable settings and their
//!   compiled, immutable snapshot
//! - [`classify::Classifier`]: assigns an operation to a [`Category`] or drops it
//! - [`projection::project`]: watched-field projection for reads
//! - [`diff::diff`]: deterministic JSON-pointer patches for updates
//! - [`redact::SecretGuard`]: credential leak guard
//! - [`emit::AuditEmitter`]: bounded, non-blocking delivery to an [`sink::AuditSink`]
//! - [`engine::AuditEngine`]: the hooks storage and transport layers call
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use serde_json::json;
//! use compliance_audit::audit::AuditTrail;
//! use compliance_audit::emit::{AuditEmitter, EmitterConfig};
//! use compliance_audit::engine::{AuditEngine, Hit};
//! use compliance_audit::projection::SourceFilter;
//! use compliance_audit::{AuditConfig, AuditSettings, Origin, ReadWatchedFields, RequestContext};
//!
//! let mut settings = AuditSettings::default();
//! settings.compliance.read_watched_fields =
//!     ReadWatchedFields::List(vec!["emp,Gender".to_string()]);
//!
//! let trail = AuditTrail::new();
//! let emitter = AuditEmitter::start(trail.clone(), EmitterConfig::default()).unwrap();
//! let engine = AuditEngine::new(AuditConfig::compile(settings).unwrap(), emitter);
//!
//! let ctx = RequestContext::new("req-1", Origin::Rest).with_user("admin");
//! let hit = Hit::new("emp", "0", json!({"Gender": "female", "Salary": 300}));
//! engine.record_read(&ctx, &hit, &SourceFilter::All);
//!
//! assert!(engine.flush(Duration::from_secs(5)));
//! assert!(trail.contains("COMPLIANCE_DOC_READ"));
//! assert!(!trail.contains("Salary"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
mod category;
pub mod classify;
mod config;
mod context;
pub mod diff;
pub mod emit;
pub mod engine;
mod error;
mod logging;
mod pattern;
pub mod projection;
pub mod redact;
pub mod resolve;
pub mod security_config;
pub mod sink;

pub use category::{Category, CategorySet};
pub use config::{
    AuditConfig, AuditFilter, AuditSettings, ComplianceConfig, ComplianceSettings, ConfigStore,
    FilterSettings, ReadWatch, ReadWatchedFields, DEFAULT_IGNORED_USER, DEFAULT_SECURITY_INDEX,
};
pub use context::{Origin, RequestContext};
pub use error::{ConfigError, Error};
pub use logging::RequestLog;
pub use pattern::Matcher;
