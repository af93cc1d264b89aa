//! Audit event schema and wire rendering.
//!
//! An [`AuditEvent`] is assembled once per resolved operation and is
//! immutable afterwards: builders consume the event and there are no
//! setters. Payloads are scrubbed before they are attached.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::category::Category;
use crate::context::{Origin, RequestContext};
use crate::diff::DiffPatch;
use crate::projection::RedactedFields;
use crate::redact::SecretGuard;

/// Version of the JSON record layout.
pub const FORMAT_VERSION: u32 = 4;

/// Kind of document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteOperation {
    /// Document did not exist before.
    Create,
    /// Existing document changed.
    Update,
    /// Document removed.
    Delete,
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOperation::Create => write!(f, "CREATE"),
            WriteOperation::Update => write!(f, "UPDATE"),
            WriteOperation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Identity of an external configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    /// Stable file id, e.g. `opensearch_yml`.
    pub id: String,
    /// Path the file was loaded from.
    pub path: String,
    /// Size in bytes of the loaded content.
    pub size: usize,
}

/// Disclosed content of an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    /// Metadata only.
    #[default]
    None,
    /// Watched fields disclosed by a read, with values.
    Fields(RedactedFields),
    /// Names of the watched fields disclosed by a read.
    FieldNames(Vec<String>),
    /// Masked document content of a write.
    Document(Value),
    /// Patch of an update.
    Diff(DiffPatch),
    /// Decoded, scrubbed security configuration.
    ConfigSnapshot {
        /// Configuration type, e.g. `internalusers`.
        config_type: String,
        /// Configuration content.
        content: Value,
    },
    /// Configuration loaded from external files.
    ExternalConfig {
        /// Parsed content keyed by file id.
        files: Map<String, Value>,
        /// Where each file came from.
        file_infos: Vec<FileInfo>,
    },
    /// Request body of a security-outcome event.
    Request(String),
}

impl Payload {
    /// Scrubs credential material in place.
    pub fn scrub(&mut self, guard: &SecretGuard) {
        match self {
            Payload::None | Payload::FieldNames(_) => {}
            Payload::Fields(fields) => {
                for (name, value) in fields.values_mut() {
                    let key = name.rsplit('.').next().unwrap_or(name);
                    guard.scrub_keyed(key, value);
                }
            }
            Payload::Document(value) => guard.scrub_value(value),
            Payload::Diff(patch) => {
                for op in patch.ops_mut() {
                    let field = op.field();
                    if let Some(value) = op.value_mut() {
                        guard.scrub_keyed(&field, value);
                    }
                }
            }
            Payload::ConfigSnapshot { content, .. } => guard.scrub_value(content),
            Payload::ExternalConfig { files, .. } => {
                for value in files.values_mut() {
                    guard.scrub_value(value);
                }
            }
            Payload::Request(body) => *body = guard.scrub_text(body),
        }
    }

    fn write_into(&self, record: &mut Map<String, Value>) {
        match self {
            Payload::None => {}
            Payload::Fields(fields) => {
                record.insert(
                    "audit_request_body".into(),
                    Value::String(fields.to_value().to_string()),
                );
            }
            Payload::FieldNames(names) => {
                record.insert(
                    "audit_compliance_read_fields".into(),
                    Value::Array(names.iter().cloned().map(Value::String).collect()),
                );
            }
            Payload::Document(doc) => {
                record.insert("audit_request_body".into(), Value::String(doc.to_string()));
            }
            Payload::Diff(patch) => {
                record.insert(
                    "audit_compliance_diff_is_noop".into(),
                    Value::Bool(patch.is_noop()),
                );
                record.insert(
                    "audit_compliance_diff_content".into(),
                    Value::String(patch.to_value().to_string()),
                );
            }
            Payload::ConfigSnapshot {
                config_type,
                content,
            } => {
                let mut body = Map::new();
                body.insert(config_type.clone(), content.clone());
                record.insert(
                    "audit_request_body".into(),
                    Value::String(Value::Object(body).to_string()),
                );
            }
            Payload::ExternalConfig { files, file_infos } => {
                let mut body = Map::new();
                body.insert("external_configuration".into(), Value::Object(files.clone()));
                record.insert(
                    "audit_request_body".into(),
                    Value::String(Value::Object(body).to_string()),
                );
                record.insert(
                    "audit_compliance_file_infos".into(),
                    serde_json::to_value(file_infos).unwrap_or(Value::Null),
                );
            }
            Payload::Request(body) => {
                record.insert("audit_request_body".into(), Value::String(body.clone()));
            }
        }
    }
}

/// A structured audit record.
///
/// # Example
///
/// ```
/// use compliance_audit::audit::{AuditEvent, WriteOperation};
/// use compliance_audit::{Category, Origin, RequestContext};
///
/// let ctx = RequestContext::new("req-123", Origin::Rest).with_user("admin");
/// let event = AuditEvent::new(Category::ComplianceDocWrite, &ctx)
///     .with_index("emp")
///     .with_doc_id("0")
///     .with_operation(WriteOperation::Delete);
///
/// let record = event.to_json();
/// assert_eq!(record["audit_category"], "COMPLIANCE_DOC_WRITE");
/// assert_eq!(record["audit_trace_indices"][0], "emp");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    id: Uuid,
    category: Category,
    origin: Origin,
    request_id: String,
    effective_user: Option<String>,
    remote_address: Option<String>,
    action: Option<String>,
    index: Option<String>,
    doc_id: Option<String>,
    version: Option<u64>,
    operation: Option<WriteOperation>,
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl AuditEvent {
    /// Creates an event for the request described by `ctx`.
    pub fn new(category: Category, ctx: &RequestContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            origin: ctx.origin(),
            request_id: ctx.request_id().to_string(),
            effective_user: ctx.effective_user().map(str::to_string),
            remote_address: ctx.remote_address().map(str::to_string),
            action: ctx.action().map(str::to_string),
            index: None,
            doc_id: None,
            version: None,
            operation: None,
            payload: Payload::None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the concrete index.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Sets the document id.
    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    /// Sets the document version after the write.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the write operation.
    pub fn with_operation(mut self, operation: WriteOperation) -> Self {
        self.operation = Some(operation);
        self
    }

    /// Attaches the payload. It must already be scrubbed.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Unique event id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Event category.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Origin layer of the request.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Request identifier.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Effective user, if authenticated.
    pub fn effective_user(&self) -> Option<&str> {
        self.effective_user.as_deref()
    }

    /// Concrete index, if any.
    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Document id, if any.
    pub fn doc_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }

    /// Document version, if known.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Write operation, for write categories.
    pub fn operation(&self) -> Option<WriteOperation> {
        self.operation
    }

    /// Disclosed content.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Creation time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Renders the event as a flat JSON record with `audit_*` field names.
    pub fn to_json(&self) -> Value {
        let mut record = Map::new();
        let mut put = |key: &str, value: Value| {
            record.insert(key.to_string(), value);
        };
        let text = |s: &str| Value::String(s.to_string());

        put("audit_format_version", Value::from(FORMAT_VERSION));
        put("audit_event_id", Value::String(self.id.to_string()));
        put("audit_category", text(self.category.as_str()));
        put("audit_request_origin", text(&self.origin.to_string()));
        put(
            "audit_utc_timestamp",
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        put("audit_request_id", text(&self.request_id));
        if let Some(user) = &self.effective_user {
            put("audit_request_effective_user", text(user));
        }
        if let Some(address) = &self.remote_address {
            put("audit_request_remote_address", text(address));
        }
        if let Some(action) = &self.action {
            put("audit_request_action", text(action));
        }
        if let Some(index) = &self.index {
            put("audit_trace_indices", Value::Array(vec![text(index)]));
        }
        if let Some(doc_id) = &self.doc_id {
            put("audit_trace_doc_id", text(doc_id));
        }
        if let Some(version) = self.version {
            put("audit_compliance_doc_version", Value::from(version));
        }
        if let Some(operation) = self.operation {
            put("audit_compliance_operation", text(&operation.to_string()));
        }

        self.payload.write_into(&mut record);
        Value::Object(record)
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AuditEvent[category={}, origin={}, request_id={}, user={}",
            self.category,
            self.origin,
            self.request_id,
            self.effective_user.as_deref().unwrap_or("<none>")
        )?;
        if let Some(index) = &self.index {
            write!(f, ", index={index}")?;
        }
        if let Some(doc_id) = &self.doc_id {
            write!(f, ", doc_id={doc_id}")?;
        }
        if let Some(operation) = self.operation {
            write!(f, ", operation={operation}")?;
        }
        write!(f, "]")
    }
}
