//! The compliance audit pipeline.
//!
//! [`AuditEngine`] is what the storage and transport collaborators call.
//! Each hook captures one configuration snapshot, classifies, builds and
//! scrubs the payload inline, then hands the event to the emitter. Hooks
//! never fail the audited operation: they return `()` and report problems
//! through logging and counters.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::audit::{AuditEvent, FileInfo, Payload, WriteOperation};
use crate::category::Category;
use crate::classify::{Access, Classifier, Decision};
use crate::config::{AuditConfig, AuditSettings, ConfigStore};
use crate::context::RequestContext;
use crate::diff::{diff, DiffError, DiffPatch};
use crate::emit::AuditEmitter;
use crate::error::{ConfigError, Error};
use crate::pattern::Matcher;
use crate::projection::{project, SourceFilter};
use crate::redact::{mask_fields, SecretGuard, REDACTED};
use crate::resolve::{expand_bulk, BulkAction, SearchItem};
use crate::security_config::SecurityConfigDoc;

/// Number of recent `(index, doc_id, version)` writes remembered for
/// de-duplication.
const DEDUPE_CAPACITY: usize = 4096;

/// Document id used for configuration-update events.
const SETTINGS_DOC_ID: &str = "audit";

/// A document returned by a read or search.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Concrete index the document lives in.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Document source.
    pub source: Value,
}

impl Hit {
    /// Creates a hit.
    pub fn new(index: impl Into<String>, id: impl Into<String>, source: Value) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            source,
        }
    }
}

/// A committed document write, as reported by the storage layer.
///
/// The operation follows from which states are present: no previous state
/// is a create, no updated state is a delete, both is an update.
#[derive(Debug, Clone, PartialEq)]
pub struct DocWrite {
    index: String,
    doc_id: String,
    previous: Option<Value>,
    updated: Option<Value>,
    version: Option<u64>,
}

impl DocWrite {
    /// Describes a write to `index`/`doc_id`.
    pub fn new(index: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_id: doc_id.into(),
            previous: None,
            updated: None,
            version: None,
        }
    }

    /// Sets the document state before the write.
    pub fn with_previous(mut self, previous: Value) -> Self {
        self.previous = Some(previous);
        self
    }

    /// Sets the document state after the write.
    pub fn with_updated(mut self, updated: Value) -> Self {
        self.updated = Some(updated);
        self
    }

    /// Sets the document version produced by the write.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Kind of write.
    pub fn operation(&self) -> WriteOperation {
        match (&self.previous, &self.updated) {
            (None, Some(_)) => WriteOperation::Create,
            (Some(_), Some(_)) => WriteOperation::Update,
            (_, None) => WriteOperation::Delete,
        }
    }
}

/// A configuration file loaded from outside the security index.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalConfigFile {
    info: FileInfo,
    content: Value,
}

impl ExternalConfigFile {
    /// Wraps already-parsed file content.
    pub fn new(id: impl Into<String>, path: impl Into<String>, content: Value) -> Self {
        let size = content.to_string().len();
        Self {
            info: FileInfo {
                id: id.into(),
                path: path.into(),
                size,
            },
            content,
        }
    }

    /// Parses a YAML file such as `opensearch.yml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the text is not valid YAML.
    pub fn from_yaml(
        id: impl Into<String>,
        path: impl Into<String>,
        text: &str,
    ) -> Result<Self, ConfigError> {
        let content: Value = serde_yaml::from_str(text)?;
        Ok(Self {
            info: FileInfo {
                id: id.into(),
                path: path.into(),
                size: text.len(),
            },
            content,
        })
    }

    /// File identity.
    pub fn info(&self) -> &FileInfo {
        &self.info
    }
}

/// Extra data for a security-outcome event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityDetails {
    /// Index the request targeted, if any.
    pub index: Option<String>,
    /// Raw request body, logged only if request body logging is on.
    pub request_body: Option<String>,
}

/// Identity of a logical write for de-duplication.
///
/// Versioned writes are keyed by the version the storage layer assigned.
/// Without a version, a write is identified within its request by its
/// before and after states.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum WriteKey {
    Versioned {
        index: String,
        doc_id: String,
        version: u64,
    },
    Unversioned {
        request_id: String,
        index: String,
        doc_id: String,
        states: u64,
    },
}

impl WriteKey {
    fn of(ctx: &RequestContext, write: &DocWrite) -> Self {
        match write.version {
            Some(version) => WriteKey::Versioned {
                index: write.index.clone(),
                doc_id: write.doc_id.clone(),
                version,
            },
            None => {
                let mut hasher = DefaultHasher::new();
                for state in [&write.previous, &write.updated] {
                    state.as_ref().map(Value::to_string).hash(&mut hasher);
                }
                WriteKey::Unversioned {
                    request_id: ctx.request_id().to_string(),
                    index: write.index.clone(),
                    doc_id: write.doc_id.clone(),
                    states: hasher.finish(),
                }
            }
        }
    }
}

/// Remembers recent writes so a retried write is audited once.
#[derive(Debug, Default)]
struct DedupeWindow {
    seen: Mutex<(HashSet<WriteKey>, VecDeque<WriteKey>)>,
}

impl DedupeWindow {
    /// Returns `true` the first time a key is offered.
    fn first_seen(&self, key: WriteKey) -> bool {
        let mut guard = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        let (set, order) = &mut *guard;
        if !set.insert(key.clone()) {
            return false;
        }
        order.push_back(key);
        if order.len() > DEDUPE_CAPACITY {
            if let Some(old) = order.pop_front() {
                set.remove(&old);
            }
        }
        true
    }
}

/// Compliance audit engine.
///
/// Share it behind an `Arc`; every method takes `&self`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use serde_json::json;
/// use compliance_audit::audit::AuditTrail;
/// use compliance_audit::emit::{AuditEmitter, EmitterConfig};
/// use compliance_audit::engine::{AuditEngine, DocWrite};
/// use compliance_audit::{AuditConfig, AuditSettings, Origin, RequestContext};
///
/// let mut settings = AuditSettings::default();
/// settings.compliance.write_watched_indices = vec!["emp".to_string()];
/// settings.compliance.write_log_diffs = true;
///
/// let trail = AuditTrail::new();
/// let emitter = AuditEmitter::start(trail.clone(), EmitterConfig::default()).unwrap();
/// let engine = AuditEngine::new(AuditConfig::compile(settings).unwrap(), emitter);
///
/// let ctx = RequestContext::new("req-1", Origin::Rest).with_user("admin");
/// engine.record_write(
///     &ctx,
///     &DocWrite::new("emp", "0")
///         .with_previous(json!({"Age": 123}))
///         .with_updated(json!({"Age": 555}))
///         .with_version(2),
/// );
///
/// assert!(engine.flush(Duration::from_secs(5)));
/// assert!(trail.contains("audit_compliance_diff_content"));
/// ```
#[derive(Debug)]
pub struct AuditEngine {
    store: ConfigStore,
    update_lock: Mutex<()>,
    emitter: AuditEmitter,
    guard: SecretGuard,
    dedupe: DedupeWindow,
    external_logged: AtomicBool,
}

impl AuditEngine {
    /// Creates an engine with an initial configuration.
    pub fn new(config: AuditConfig, emitter: AuditEmitter) -> Self {
        Self {
            store: ConfigStore::new(config),
            update_lock: Mutex::new(()),
            emitter,
            guard: SecretGuard::new(),
            dedupe: DedupeWindow::default(),
            external_logged: AtomicBool::new(false),
        }
    }

    /// Active configuration snapshot.
    pub fn config(&self) -> Arc<AuditConfig> {
        self.store.current()
    }

    /// The emitter events are handed to.
    pub fn emitter(&self) -> &AuditEmitter {
        &self.emitter
    }

    /// Waits for queued events to be handled. See [`AuditEmitter::flush`].
    pub fn flush(&self, timeout: Duration) -> bool {
        self.emitter.flush(timeout)
    }

    /// Number of values the leak guard has replaced.
    pub fn guard_trips(&self) -> u64 {
        self.guard.trips()
    }

    /// Validates and installs new settings.
    ///
    /// Whether the change itself is audited is decided by the configuration
    /// active when the update starts. The event carries the diff between the
    /// old and new settings, scrubbed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the settings do not compile; the active
    /// configuration is left unchanged.
    pub fn update_config(
        &self,
        ctx: &RequestContext,
        settings: AuditSettings,
    ) -> Result<Arc<AuditConfig>, Error> {
        let _writer = self.update_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let next = AuditConfig::compile(settings).map_err(|err| {
            ctx.log()
                .warn(format_args!("audit configuration rejected: {err}"));
            err
        })?;
        let previous = self.store.current();
        let decision = Classifier::new(&previous).classify(ctx, Access::InternalConfigWrite);

        let before = serde_json::to_value(previous.settings()).unwrap_or(Value::Null);
        let after = serde_json::to_value(next.settings()).unwrap_or(Value::Null);
        let replaced = self.store.update(next);
        ctx.log().info(format_args!("installed audit configuration"));

        if let Decision::Audit(category) = decision {
            let patch = self.diff_or_replaced(ctx, &before, &after, &Matcher::default());
            let event = AuditEvent::new(category, ctx)
                .with_index(previous.compliance().security_index())
                .with_doc_id(SETTINGS_DOC_ID)
                .with_operation(WriteOperation::Update);
            self.emit(event, Payload::Diff(patch));
        }
        Ok(replaced)
    }

    /// Audits a single document read (get).
    pub fn record_read(&self, ctx: &RequestContext, hit: &Hit, requested: &SourceFilter) {
        let config = self.store.current();
        self.read_with(&config, ctx, hit, requested);
    }

    /// Audits the hits of one search, each hit as a separate read.
    pub fn record_search(&self, ctx: &RequestContext, requested: &SourceFilter, hits: &[Hit]) {
        let config = self.store.current();
        for hit in hits {
            self.read_with(&config, ctx, hit, requested);
        }
    }

    /// Audits a multi-search: `responses[i]` holds the hits of `items[i]`.
    pub fn record_msearch(&self, ctx: &RequestContext, items: &[SearchItem], responses: &[Vec<Hit>]) {
        let config = self.store.current();
        for (item, hits) in items.iter().zip(responses) {
            for hit in hits {
                self.read_with(&config, ctx, hit, &item.filter);
            }
        }
    }

    /// Audits a committed document write.
    pub fn record_write(&self, ctx: &RequestContext, write: &DocWrite) {
        let config = self.store.current();
        self.write_with(&config, ctx, write);
    }

    /// Expands a bulk body and audits every item as its own write.
    ///
    /// `previous` looks up the stored state of `(index, doc_id)` before the
    /// bulk was applied. Returns the number of events emitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Resolve`] if the body is malformed; nothing is
    /// audited in that case.
    pub fn record_bulk<F>(
        &self,
        ctx: &RequestContext,
        default_index: Option<&str>,
        body: &str,
        previous: F,
    ) -> Result<usize, Error>
    where
        F: Fn(&str, &str) -> Option<Value>,
    {
        let items = expand_bulk(default_index, body).map_err(|err| {
            ctx.log().warn(format_args!("bulk body not audited: {err}"));
            err
        })?;

        let config = self.store.current();
        let mut emitted = 0;
        for item in &items {
            let prior = match (&item.doc_id, item.action) {
                (Some(id), BulkAction::Update | BulkAction::Index | BulkAction::Delete) => {
                    previous(&item.index, id)
                }
                _ => None,
            };
            let mut write = DocWrite::new(&item.index, item.doc_id.as_deref().unwrap_or(""));
            write.updated = item.updated(prior.as_ref());
            write.previous = prior;
            if self.write_with(&config, ctx, &write) {
                emitted += 1;
            }
        }
        Ok(emitted)
    }

    /// Audits reads of security configuration documents.
    pub fn record_internal_config_read(&self, ctx: &RequestContext, docs: &[SecurityConfigDoc]) {
        let config = self.store.current();
        let classifier = Classifier::new(&config);
        for doc in docs {
            let Decision::Audit(category) = classifier.classify(ctx, Access::InternalConfigRead)
            else {
                return;
            };
            let event = AuditEvent::new(category, ctx)
                .with_index(config.compliance().security_index())
                .with_doc_id(doc.id());
            self.emit(event, self.config_snapshot(ctx, doc));
        }
    }

    /// Audits a write of a security configuration document.
    pub fn record_internal_config_write(
        &self,
        ctx: &RequestContext,
        previous: Option<&SecurityConfigDoc>,
        updated: &SecurityConfigDoc,
    ) {
        let config = self.store.current();
        let Decision::Audit(category) =
            Classifier::new(&config).classify(ctx, Access::InternalConfigWrite)
        else {
            return;
        };
        let operation = if previous.is_some() {
            WriteOperation::Update
        } else {
            WriteOperation::Create
        };
        let event = AuditEvent::new(category, ctx)
            .with_index(config.compliance().security_index())
            .with_doc_id(updated.id())
            .with_operation(operation);
        let payload = self.internal_write_payload(&config, ctx, previous, updated);
        self.emit(event, payload);
    }

    /// Audits configuration loaded from external files.
    ///
    /// Emitted at most once per engine.
    pub fn record_external_config(&self, ctx: &RequestContext, files: &[ExternalConfigFile]) {
        let config = self.store.current();
        let Decision::Audit(category) =
            Classifier::new(&config).classify(ctx, Access::ExternalConfig)
        else {
            return;
        };
        if self.external_logged.swap(true, Ordering::AcqRel) {
            ctx.log()
                .debug(format_args!("external configuration already audited"));
            return;
        }

        let files_map: Map<String, Value> = files
            .iter()
            .map(|f| (f.info.id.clone(), f.content.clone()))
            .collect();
        let payload = Payload::ExternalConfig {
            files: files_map,
            file_infos: files.iter().map(|f| f.info.clone()).collect(),
        };
        self.emit(AuditEvent::new(category, ctx), payload);
    }

    /// Audits a security outcome such as a failed login.
    pub fn record_security_event(
        &self,
        ctx: &RequestContext,
        category: Category,
        details: SecurityDetails,
    ) {
        let config = self.store.current();
        let Decision::Audit(category) =
            Classifier::new(&config).classify(ctx, Access::Security(category))
        else {
            return;
        };
        let mut event = AuditEvent::new(category, ctx);
        if let Some(index) = details.index {
            event = event.with_index(index);
        }
        let payload = match details.request_body {
            Some(body) if config.filter().log_request_body() => Payload::Request(body),
            _ => Payload::None,
        };
        self.emit(event, payload);
    }

    fn read_with(
        &self,
        config: &AuditConfig,
        ctx: &RequestContext,
        hit: &Hit,
        requested: &SourceFilter,
    ) {
        let access = Access::DocRead { index: &hit.index };
        let category = match Classifier::new(config).classify(ctx, access) {
            Decision::Audit(category) => category,
            Decision::Drop(_) => return,
        };
        let event = AuditEvent::new(category, ctx)
            .with_index(&hit.index)
            .with_doc_id(&hit.id);

        if category == Category::ComplianceInternalConfigRead {
            let doc = SecurityConfigDoc::new(&hit.id, hit.source.clone());
            self.emit(event, self.config_snapshot(ctx, &doc));
            return;
        }

        let compliance = config.compliance();
        let mut fields = project(&hit.source, &hit.index, requested, compliance.read_watch());
        if fields.is_empty() {
            ctx.log().debug(format_args!(
                "read of {}/{} disclosed no watched field; not audited",
                hit.index, hit.id
            ));
            return;
        }

        let payload = if compliance.read_metadata_only() {
            Payload::FieldNames(fields.names().map(str::to_string).collect())
        } else {
            let masked = compliance.masked_fields();
            for (name, value) in fields.values_mut() {
                if masked.matches_path(name) {
                    *value = Value::String(REDACTED.to_string());
                }
            }
            Payload::Fields(fields)
        };
        self.emit(event, payload);
    }

    /// Returns `true` if an event was emitted.
    fn write_with(&self, config: &AuditConfig, ctx: &RequestContext, write: &DocWrite) -> bool {
        let access = Access::DocWrite {
            index: &write.index,
        };
        let category = match Classifier::new(config).classify(ctx, access) {
            Decision::Audit(category) => category,
            Decision::Drop(_) => return false,
        };

        if !self.dedupe.first_seen(WriteKey::of(ctx, write)) {
            ctx.log().debug(format_args!(
                "write {}/{} already audited",
                write.index, write.doc_id
            ));
            return false;
        }

        let operation = write.operation();
        let mut event = AuditEvent::new(category, ctx)
            .with_index(&write.index)
            .with_doc_id(&write.doc_id)
            .with_operation(operation);
        if let Some(version) = write.version {
            event = event.with_version(version);
        }

        let payload = if category == Category::ComplianceInternalConfigWrite {
            let updated = SecurityConfigDoc::new(
                &write.doc_id,
                write.updated.clone().unwrap_or(Value::Null),
            );
            let previous = write
                .previous
                .clone()
                .map(|source| SecurityConfigDoc::new(&write.doc_id, source));
            self.internal_write_payload(config, ctx, previous.as_ref(), &updated)
        } else {
            self.doc_write_payload(config, ctx, write, operation)
        };
        self.emit(event, payload);
        true
    }

    fn doc_write_payload(
        &self,
        config: &AuditConfig,
        ctx: &RequestContext,
        write: &DocWrite,
        operation: WriteOperation,
    ) -> Payload {
        let compliance = config.compliance();
        if compliance.write_metadata_only() {
            return Payload::None;
        }
        let masked = compliance.masked_fields();

        match (operation, &write.previous, &write.updated) {
            (WriteOperation::Update, Some(previous), Some(updated))
                if compliance.write_log_diffs() =>
            {
                Payload::Diff(self.diff_or_replaced(ctx, previous, updated, masked))
            }
            (WriteOperation::Create | WriteOperation::Update, _, Some(updated)) => {
                let mut document = updated.clone();
                mask_fields(&mut document, masked);
                Payload::Document(document)
            }
            _ => Payload::None,
        }
    }

    fn internal_write_payload(
        &self,
        config: &AuditConfig,
        ctx: &RequestContext,
        previous: Option<&SecurityConfigDoc>,
        updated: &SecurityConfigDoc,
    ) -> Payload {
        let next = match updated.decoded() {
            Ok(next) => next,
            Err(err) => {
                ctx.log().warn(format_args!(
                    "security config '{}' could not be decoded: {err}",
                    updated.id()
                ));
                return self.config_snapshot(ctx, updated);
            }
        };

        if config.compliance().write_log_diffs() {
            if let Some(Ok(before)) = previous.map(SecurityConfigDoc::decoded) {
                return Payload::Diff(self.diff_or_replaced(ctx, &before, &next, &Matcher::default()));
            }
        }
        Payload::ConfigSnapshot {
            config_type: updated.id().to_string(),
            content: next,
        }
    }

    fn config_snapshot(&self, ctx: &RequestContext, doc: &SecurityConfigDoc) -> Payload {
        let content = doc.decoded().unwrap_or_else(|err| {
            ctx.log().warn(format_args!(
                "security config '{}' could not be decoded: {err}",
                doc.id()
            ));
            doc.source().clone()
        });
        Payload::ConfigSnapshot {
            config_type: doc.id().to_string(),
            content,
        }
    }

    fn diff_or_replaced(
        &self,
        ctx: &RequestContext,
        previous: &Value,
        updated: &Value,
        masked: &Matcher,
    ) -> DiffPatch {
        match diff(previous, updated, masked) {
            Ok(patch) => patch,
            Err(err @ DiffError::Incomparable { .. }) => {
                ctx.log()
                    .debug(format_args!("logging coarse replace: {err}"));
                DiffPatch::replaced_document()
            }
            Err(err) => {
                ctx.log().warn(format_args!("diff failed: {err}"));
                DiffPatch::replaced_document()
            }
        }
    }

    fn emit(&self, event: AuditEvent, mut payload: Payload) {
        payload.scrub(&self.guard);
        self.emitter.emit(event.with_payload(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTrail;
    use crate::config::ReadWatchedFields;
    use crate::context::Origin;
    use crate::emit::EmitterConfig;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(5);

    fn engine(edit: impl FnOnce(&mut AuditSettings)) -> (AuditEngine, AuditTrail) {
        let mut settings = AuditSettings::default();
        settings.compliance.write_watched_indices = vec!["emp".to_string()];
        settings.compliance.read_watched_fields =
            ReadWatchedFields::List(vec!["emp".to_string()]);
        edit(&mut settings);
        let trail = AuditTrail::new();
        let emitter = AuditEmitter::start(trail.clone(), EmitterConfig::default()).unwrap();
        (
            AuditEngine::new(AuditConfig::compile(settings).unwrap(), emitter),
            trail,
        )
    }

    fn ctx() -> RequestContext {
        RequestContext::new("req-1", Origin::Rest).with_user("admin")
    }

    #[test]
    fn retried_write_is_audited_once() {
        let (engine, trail) = engine(|s| s.compliance.write_log_diffs = true);
        let write = DocWrite::new("emp", "1")
            .with_previous(json!({"Age": 1}))
            .with_updated(json!({"Age": 2}))
            .with_version(7);

        engine.record_write(&ctx(), &write);
        engine.record_write(&ctx(), &write);

        assert!(engine.flush(WAIT));
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn dedupe_window_evicts_oldest() {
        let key = |version| WriteKey::Versioned {
            index: "emp".to_string(),
            doc_id: "0".to_string(),
            version,
        };
        let window = DedupeWindow::default();
        assert!(window.first_seen(key(0)));
        for v in 1..=DEDUPE_CAPACITY as u64 {
            assert!(window.first_seen(key(v)));
        }
        assert!(window.first_seen(key(0)));
        assert!(!window.first_seen(key(DEDUPE_CAPACITY as u64)));
    }

    #[test]
    fn retried_unversioned_write_is_audited_once() {
        let (engine, trail) = engine(|s| s.compliance.write_log_diffs = true);
        let write = DocWrite::new("emp", "1")
            .with_previous(json!({"Age": 1}))
            .with_updated(json!({"Age": 2}));

        engine.record_write(&ctx(), &write);
        engine.record_write(&ctx(), &write);
        // A different change to the same document is its own write.
        engine.record_write(
            &ctx(),
            &DocWrite::new("emp", "1")
                .with_previous(json!({"Age": 2}))
                .with_updated(json!({"Age": 3})),
        );

        assert!(engine.flush(WAIT));
        assert_eq!(trail.len(), 2);
    }

    #[test]
    fn retried_bulk_update_is_audited_once() {
        let (engine, trail) = engine(|s| s.compliance.write_log_diffs = true);
        let body = "{\"update\":{\"_id\":\"2\"}}\n{\"doc\":{\"Age\":41}}\n";
        let stored = |_: &str, _: &str| Some(json!({"Age": 40}));

        assert_eq!(engine.record_bulk(&ctx(), Some("emp"), body, stored).unwrap(), 1);
        assert_eq!(engine.record_bulk(&ctx(), Some("emp"), body, stored).unwrap(), 0);

        assert!(engine.flush(WAIT));
        assert_eq!(trail.len(), 1);
        assert!(trail.contains("audit_compliance_diff_content"));
    }

    #[test]
    fn incomparable_update_logs_coarse_replace() {
        let (engine, trail) = engine(|s| s.compliance.write_log_diffs = true);
        engine.record_write(
            &ctx(),
            &DocWrite::new("emp", "1")
                .with_previous(json!("legacy"))
                .with_updated(json!({"Age": 2})),
        );
        assert!(engine.flush(WAIT));
        let events = trail.events();
        let Payload::Diff(patch) = events[0].payload() else {
            panic!("expected a diff payload");
        };
        assert!(patch.is_replaced());
    }

    #[test]
    fn write_metadata_only_carries_no_content() {
        let (engine, trail) = engine(|s| s.compliance.write_metadata_only = true);
        engine.record_write(
            &ctx(),
            &DocWrite::new("emp", "1").with_updated(json!({"Salary": 900})),
        );
        assert!(engine.flush(WAIT));
        assert_eq!(trail.len(), 1);
        assert!(!trail.contains("Salary"));
    }

    #[test]
    fn masked_fields_hidden_in_documents_and_reads() {
        let (engine, trail) = engine(|s| s.compliance.masked_fields = vec!["Salary".to_string()]);
        engine.record_write(
            &ctx(),
            &DocWrite::new("emp", "1").with_updated(json!({"Salary": 98765, "Gender": "f"})),
        );
        engine.record_read(
            &ctx(),
            &Hit::new("emp", "1", json!({"Salary": 98765, "Gender": "f"})),
            &SourceFilter::All,
        );
        assert!(engine.flush(WAIT));
        assert_eq!(trail.len(), 2);
        assert!(!trail.contains("98765"));
        assert!(trail.contains("Gender"));
    }

    #[test]
    fn read_metadata_only_lists_names() {
        let (engine, trail) = engine(|s| s.compliance.read_metadata_only = true);
        engine.record_read(
            &ctx(),
            &Hit::new("emp", "1", json!({"Gender": "female"})),
            &SourceFilter::All,
        );
        assert!(engine.flush(WAIT));
        assert!(trail.contains("audit_compliance_read_fields"));
        assert!(!trail.contains("female"));
    }

    #[test]
    fn external_config_once() {
        let (engine, trail) = engine(|s| s.compliance.external_config = true);
        let file = ExternalConfigFile::from_yaml(
            "opensearch_yml",
            "config/opensearch.yml",
            "cluster.name: audit\nplugins:\n  security:\n    ssl_only: true\n",
        )
        .unwrap();

        engine.record_external_config(&ctx(), std::slice::from_ref(&file));
        engine.record_external_config(&ctx(), std::slice::from_ref(&file));

        assert!(engine.flush(WAIT));
        assert_eq!(trail.len(), 1);
        assert!(trail.contains("COMPLIANCE_EXTERNAL_CONFIG"));
        assert!(trail.contains("external_configuration"));
        assert!(trail.contains("opensearch_yml"));
    }

    #[test]
    fn security_event_body_respects_switch() {
        let (engine, trail) = engine(|s| s.audit.log_request_body = false);
        engine.record_security_event(
            &ctx(),
            Category::MissingPrivileges,
            SecurityDetails {
                index: Some("finance".to_string()),
                request_body: Some("{\"query\":{}}".to_string()),
            },
        );
        assert!(engine.flush(WAIT));
        assert!(trail.contains("MISSING_PRIVILEGES"));
        assert!(!trail.contains("query"));
    }

    #[test]
    fn rejected_update_keeps_old_config() {
        let (engine, _trail) = engine(|_| {});
        let mut bad = AuditSettings::default();
        bad.audit.disabled_rest_categories = vec!["NOT_A_CATEGORY".to_string()];

        let err = engine.update_config(&ctx(), bad).unwrap_err();

        assert!(matches!(err, Error::Config(ConfigError::UnknownCategory(_))));
        assert!(engine.config().compliance().is_write_watched("emp"));
    }

    #[test]
    fn bulk_errors_audit_nothing() {
        let (engine, trail) = engine(|_| {});
        let body = "{\"index\":{\"_id\":\"1\"}}\n{\"a\":1}\n{\"index\":{\"_id\":\"2\"}}\n{broken";
        assert!(engine.record_bulk(&ctx(), Some("emp"), body, |_, _| None).is_err());
        assert!(engine.flush(WAIT));
        assert!(trail.is_empty());
    }
}
