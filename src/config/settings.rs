//! Serializable shape of the audit settings.
//!
//! These are the raw values as an administrator writes them. They are
//! compiled into an immutable [`AuditConfig`](super::AuditConfig) before
//! use; nothing on the request path reads the raw settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default user excluded from auditing (the dashboards service account).
pub const DEFAULT_IGNORED_USER: &str = "kibanaserver";

/// Default name of the index holding the security configuration.
pub const DEFAULT_SECURITY_INDEX: &str = ".opendistro_security";

/// Top-level audit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Master switch for all auditing.
    pub enabled: bool,
    /// REST/transport filters for security-outcome categories.
    pub audit: FilterSettings,
    /// Compliance (data access) settings.
    pub compliance: ComplianceSettings,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            audit: FilterSettings::default(),
            compliance: ComplianceSettings::default(),
        }
    }
}

impl AuditSettings {
    /// Parses settings from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if the document does not match the
    /// settings shape.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses settings from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the document does not match the
    /// settings shape.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// Category filters and request-level switches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Audit security-outcome events raised on the REST layer.
    pub enable_rest: bool,
    /// Categories never emitted for REST-originated requests.
    pub disabled_rest_categories: Vec<String>,
    /// Audit security-outcome events raised on the transport layer.
    pub enable_transport: bool,
    /// Categories never emitted for transport-originated requests.
    pub disabled_transport_categories: Vec<String>,
    /// Include the request body in security-outcome events.
    pub log_request_body: bool,
    /// Users whose requests are never audited.
    pub ignore_users: Vec<String>,
    /// Request actions or paths that are never audited.
    pub ignore_requests: Vec<String>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            enable_rest: true,
            disabled_rest_categories: vec![
                "AUTHENTICATED".to_string(),
                "GRANTED_PRIVILEGES".to_string(),
            ],
            enable_transport: true,
            disabled_transport_categories: vec![
                "AUTHENTICATED".to_string(),
                "GRANTED_PRIVILEGES".to_string(),
            ],
            log_request_body: true,
            ignore_users: vec![DEFAULT_IGNORED_USER.to_string()],
            ignore_requests: Vec::new(),
        }
    }
}

/// Compliance watch rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceSettings {
    /// Master switch for compliance categories.
    pub enabled: bool,
    /// Audit reads and writes of the security configuration.
    pub internal_config: bool,
    /// Audit configuration loaded from external files at start-up.
    pub external_config: bool,
    /// Log only the names of disclosed fields, not their values.
    pub read_metadata_only: bool,
    /// Fields watched for reads, per index pattern.
    pub read_watched_fields: ReadWatchedFields,
    /// Users whose reads are not audited.
    pub read_ignore_users: Vec<String>,
    /// Log only write metadata, no document content or diff.
    pub write_metadata_only: bool,
    /// Log a diff for updates instead of the full new document.
    pub write_log_diffs: bool,
    /// Index patterns watched for writes.
    pub write_watched_indices: Vec<String>,
    /// Users whose writes are not audited.
    pub write_ignore_users: Vec<String>,
    /// Field patterns whose values never appear in write payloads or diffs.
    pub masked_fields: Vec<String>,
    /// Index holding the security configuration.
    pub security_index: String,
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            internal_config: true,
            external_config: false,
            read_metadata_only: false,
            read_watched_fields: ReadWatchedFields::default(),
            read_ignore_users: vec![DEFAULT_IGNORED_USER.to_string()],
            write_metadata_only: false,
            write_log_diffs: false,
            write_watched_indices: Vec::new(),
            write_ignore_users: vec![DEFAULT_IGNORED_USER.to_string()],
            masked_fields: Vec::new(),
            security_index: DEFAULT_SECURITY_INDEX.to_string(),
        }
    }
}

/// Read-watched fields, in either of the two accepted shapes.
///
/// The map form is `{"emp": ["Gender", "Salary"]}`. The list form is
/// `["emp,Gender,Salary", "finance"]`: the first entry of each item is the
/// index pattern, the rest are field patterns, and an index with no fields
/// watches every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadWatchedFields {
    /// Index pattern to field patterns.
    Map(BTreeMap<String, Vec<String>>),
    /// Comma-separated `index,field,...` entries.
    List(Vec<String>),
}

impl Default for ReadWatchedFields {
    fn default() -> Self {
        ReadWatchedFields::Map(BTreeMap::new())
    }
}

impl ReadWatchedFields {
    /// Normalizes either shape into `(index pattern, field patterns)` pairs.
    ///
    /// An empty field list becomes `["*"]`.
    pub fn entries(&self) -> Vec<(String, Vec<String>)> {
        let with_default = |fields: Vec<String>| {
            if fields.is_empty() {
                vec!["*".to_string()]
            } else {
                fields
            }
        };

        match self {
            ReadWatchedFields::Map(map) => map
                .iter()
                .map(|(index, fields)| (index.clone(), with_default(fields.clone())))
                .collect(),
            ReadWatchedFields::List(items) => items
                .iter()
                .filter_map(|item| {
                    let mut parts = item
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_string);
                    let index = parts.next()?;
                    Some((index, with_default(parts.collect())))
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = AuditSettings::default();
        assert!(s.enabled);
        assert!(s.audit.enable_rest);
        assert_eq!(
            s.audit.disabled_rest_categories,
            vec!["AUTHENTICATED", "GRANTED_PRIVILEGES"]
        );
        assert!(s.compliance.enabled);
        assert!(s.compliance.internal_config);
        assert!(!s.compliance.external_config);
        assert!(!s.compliance.write_log_diffs);
        assert_eq!(s.compliance.security_index, DEFAULT_SECURITY_INDEX);
    }

    #[test]
    fn parses_partial_json_with_defaults() {
        let s = AuditSettings::from_json(
            r#"{"compliance": {"write_watched_indices": ["emp"], "write_log_diffs": true}}"#,
        )
        .unwrap();
        assert!(s.enabled);
        assert_eq!(s.compliance.write_watched_indices, vec!["emp"]);
        assert!(s.compliance.write_log_diffs);
        assert!(s.compliance.internal_config);
    }

    #[test]
    fn parses_yaml() {
        let yaml = r#"
enabled: true
audit:
  disabled_rest_categories: [authenticated, GRANTED_PRIVILEGES]
compliance:
  read_watched_fields:
    emp: [Gender]
"#;
        let s = AuditSettings::from_yaml(yaml).unwrap();
        assert_eq!(
            s.compliance.read_watched_fields.entries(),
            vec![("emp".to_string(), vec!["Gender".to_string()])]
        );
    }

    #[test]
    fn list_form_read_watched_fields() {
        let fields = ReadWatchedFields::List(vec![
            "humanresources,Designation,FirstName,LastName".to_string(),
            "emp".to_string(),
        ]);
        let entries = fields.entries();
        assert_eq!(entries[0].0, "humanresources");
        assert_eq!(entries[0].1, vec!["Designation", "FirstName", "LastName"]);
        assert_eq!(entries[1], ("emp".to_string(), vec!["*".to_string()]));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = AuditSettings::from_json("{\"enabled\": \"yes\"}").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
