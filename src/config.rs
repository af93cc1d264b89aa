//! Immutable audit configuration snapshot.
//!
//! [`AuditSettings`] is the serializable shape; [`AuditConfig`] is the
//! compiled, validated form consulted on the request path. Every pattern is
//! compiled once here, and a rejected settings document never replaces the
//! active configuration.

mod settings;
mod store;

pub use settings::{
    AuditSettings, ComplianceSettings, FilterSettings, ReadWatchedFields, DEFAULT_IGNORED_USER,
    DEFAULT_SECURITY_INDEX,
};
pub use store::ConfigStore;

use crate::category::CategorySet;
use crate::context::Origin;
use crate::error::ConfigError;
use crate::pattern::Matcher;

/// Compiled audit configuration.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    settings: AuditSettings,
    enabled: bool,
    filter: AuditFilter,
    compliance: ComplianceConfig,
}

impl AuditConfig {
    /// Validates and compiles settings into a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a category name is unknown, a pattern
    /// does not compile, or the security index name is empty.
    pub fn compile(settings: AuditSettings) -> Result<Self, ConfigError> {
        let filter = AuditFilter::compile(&settings.audit)?;
        let compliance = ComplianceConfig::compile(&settings.compliance)?;
        Ok(Self {
            enabled: settings.enabled,
            settings,
            filter,
            compliance,
        })
    }

    /// Master audit switch.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Category filters.
    pub fn filter(&self) -> &AuditFilter {
        &self.filter
    }

    /// Compliance rules.
    pub fn compliance(&self) -> &ComplianceConfig {
        &self.compliance
    }

    /// The settings this snapshot was compiled from.
    pub fn settings(&self) -> &AuditSettings {
        &self.settings
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self::compile(AuditSettings::default()).expect("default audit settings compile")
    }
}

/// Filters for security-outcome categories and request-level exclusions.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    enable_rest: bool,
    enable_transport: bool,
    disabled_rest: CategorySet,
    disabled_transport: CategorySet,
    log_request_body: bool,
    ignore_users: Matcher,
    ignore_requests: Matcher,
}

impl AuditFilter {
    fn compile(s: &FilterSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            enable_rest: s.enable_rest,
            enable_transport: s.enable_transport,
            disabled_rest: CategorySet::parse_names(&s.disabled_rest_categories)?,
            disabled_transport: CategorySet::parse_names(&s.disabled_transport_categories)?,
            log_request_body: s.log_request_body,
            ignore_users: Matcher::compile(&s.ignore_users)?,
            ignore_requests: Matcher::compile(&s.ignore_requests)?,
        })
    }

    /// Returns `true` if security-outcome events from this origin are audited.
    pub fn origin_enabled(&self, origin: Origin) -> bool {
        match origin {
            Origin::Rest => self.enable_rest,
            Origin::Transport => self.enable_transport,
        }
    }

    /// Categories disabled for an origin.
    pub fn disabled_categories(&self, origin: Origin) -> CategorySet {
        match origin {
            Origin::Rest => self.disabled_rest,
            Origin::Transport => self.disabled_transport,
        }
    }

    /// Whether request bodies go into security-outcome events.
    pub fn log_request_body(&self) -> bool {
        self.log_request_body
    }

    /// Users excluded from security-outcome auditing.
    pub fn ignore_users(&self) -> &Matcher {
        &self.ignore_users
    }

    /// Request actions or paths excluded from security-outcome auditing.
    pub fn ignore_requests(&self) -> &Matcher {
        &self.ignore_requests
    }
}

/// Compiled compliance rules.
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    enabled: bool,
    internal_config: bool,
    external_config: bool,
    read_metadata_only: bool,
    write_metadata_only: bool,
    write_log_diffs: bool,
    read_watched: ReadWatch,
    write_watched: Matcher,
    read_ignore_users: Matcher,
    write_ignore_users: Matcher,
    masked_fields: Matcher,
    security_index: String,
}

impl ComplianceConfig {
    fn compile(s: &ComplianceSettings) -> Result<Self, ConfigError> {
        if s.security_index.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "compliance.security_index",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Self {
            enabled: s.enabled,
            internal_config: s.internal_config,
            external_config: s.external_config,
            read_metadata_only: s.read_metadata_only,
            write_metadata_only: s.write_metadata_only,
            write_log_diffs: s.write_log_diffs,
            read_watched: ReadWatch::compile(&s.read_watched_fields)?,
            write_watched: Matcher::compile(&s.write_watched_indices)?,
            read_ignore_users: Matcher::compile(&s.read_ignore_users)?,
            write_ignore_users: Matcher::compile(&s.write_ignore_users)?,
            masked_fields: Matcher::compile(&s.masked_fields)?,
            security_index: s.security_index.trim().to_string(),
        })
    }

    /// Master compliance switch.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Security configuration reads and writes are audited.
    pub fn internal_config(&self) -> bool {
        self.internal_config
    }

    /// External configuration loads are audited.
    pub fn external_config(&self) -> bool {
        self.external_config
    }

    /// Read events carry field names only.
    pub fn read_metadata_only(&self) -> bool {
        self.read_metadata_only
    }

    /// Write events carry no document content.
    pub fn write_metadata_only(&self) -> bool {
        self.write_metadata_only
    }

    /// Updates are logged as diffs.
    pub fn write_log_diffs(&self) -> bool {
        self.write_log_diffs
    }

    /// Read watch rules.
    pub fn read_watch(&self) -> &ReadWatch {
        &self.read_watched
    }

    /// Returns `true` if writes to `index` are watched.
    pub fn is_write_watched(&self, index: &str) -> bool {
        self.write_watched.matches(index)
    }

    /// Users whose reads are not audited.
    pub fn read_ignore_users(&self) -> &Matcher {
        &self.read_ignore_users
    }

    /// Users whose writes are not audited.
    pub fn write_ignore_users(&self) -> &Matcher {
        &self.write_ignore_users
    }

    /// Fields whose values are never disclosed in write events.
    pub fn masked_fields(&self) -> &Matcher {
        &self.masked_fields
    }

    /// Name of the security configuration index.
    pub fn security_index(&self) -> &str {
        &self.security_index
    }
}

/// Read watch rules: index patterns paired with field patterns.
#[derive(Debug, Clone, Default)]
pub struct ReadWatch {
    rules: Vec<(Matcher, Matcher)>,
}

impl ReadWatch {
    fn compile(fields: &ReadWatchedFields) -> Result<Self, ConfigError> {
        let rules = fields
            .entries()
            .into_iter()
            .map(|(index, fields)| Ok((Matcher::compile([index])?, Matcher::compile(fields)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { rules })
    }

    /// Returns `true` if any rule watches `index`.
    pub fn watches_index(&self, index: &str) -> bool {
        self.rules.iter().any(|(i, _)| i.matches(index))
    }

    /// Returns `true` if the dotted field path is watched on `index`.
    ///
    /// A field is watched if it or one of its ancestors matches a field
    /// pattern of a rule whose index pattern matches.
    pub fn is_field_watched(&self, index: &str, path: &str) -> bool {
        self.rules
            .iter()
            .any(|(i, f)| i.matches(index) && f.matches_path(path))
    }
}
