//! Stored security configuration documents.
//!
//! The security index holds one document per configuration type. Each
//! document's source maps the type name to a base64-encoded JSON blob, e.g.
//! `{"internalusers": "eyJhZG1pbiI6..."}`. Audit payloads and diffs work on
//! the decoded content; the encoded blob itself must never reach a sink.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from decoding a stored configuration document.
#[derive(Debug, Error)]
pub enum SecurityConfigError {
    /// The document source is not a JSON object.
    #[error("security config document '{0}' is not an object")]
    NotAnObject(String),

    /// A field is not valid base64.
    #[error("field '{field}' is not valid base64: {source}")]
    Base64 {
        /// Source field name.
        field: String,
        /// Decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// A decoded field is not valid JSON.
    #[error("field '{field}' does not hold JSON: {source}")]
    Json {
        /// Source field name.
        field: String,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
}

/// Kind of security configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigType {
    /// Authentication and authorization backends.
    Config,
    /// Internal user database, including password hashes.
    InternalUsers,
    /// Role definitions.
    Roles,
    /// Role to user/backend role mappings.
    RolesMapping,
    /// Named permission groups.
    ActionGroups,
    /// Tenant definitions.
    Tenants,
    /// Trusted node certificate DNs.
    NodesDn,
    /// Allowed REST endpoints.
    Whitelist,
    /// Audit configuration.
    Audit,
}

impl ConfigType {
    /// Document id and source key of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigType::Config => "config",
            ConfigType::InternalUsers => "internalusers",
            ConfigType::Roles => "roles",
            ConfigType::RolesMapping => "rolesmapping",
            ConfigType::ActionGroups => "actiongroups",
            ConfigType::Tenants => "tenants",
            ConfigType::NodesDn => "nodesdn",
            ConfigType::Whitelist => "whitelist",
            ConfigType::Audit => "audit",
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "config" => ConfigType::Config,
            "internalusers" => ConfigType::InternalUsers,
            "roles" => ConfigType::Roles,
            "rolesmapping" => ConfigType::RolesMapping,
            "actiongroups" => ConfigType::ActionGroups,
            "tenants" => ConfigType::Tenants,
            "nodesdn" => ConfigType::NodesDn,
            "whitelist" => ConfigType::Whitelist,
            "audit" => ConfigType::Audit,
            _ => return Err(()),
        })
    }
}

/// A document of the security index as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityConfigDoc {
    id: String,
    source: Value,
}

impl SecurityConfigDoc {
    /// Wraps a stored document.
    pub fn new(id: impl Into<String>, source: Value) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }

    /// Builds the stored form of `content`, encoding it under the type's key.
    pub fn encode(config_type: ConfigType, content: &Value) -> Self {
        let mut source = Map::new();
        source.insert(
            config_type.as_str().to_string(),
            Value::String(STANDARD.encode(content.to_string())),
        );
        Self::new(config_type.as_str(), Value::Object(source))
    }

    /// Document id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configuration type, if the id names a known one.
    pub fn config_type(&self) -> Option<ConfigType> {
        self.id.parse().ok()
    }

    /// Raw stored source.
    pub fn source(&self) -> &Value {
        &self.source
    }

    /// Decodes the stored blobs.
    ///
    /// A source holding only the field named after the document id decodes
    /// to that field's content. Otherwise every string field that is a
    /// base64 JSON blob is decoded in place and other fields are kept.
    ///
    /// The result still contains credential material; it must pass through
    /// the leak guard before it is logged.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityConfigError`] if the source is not an object or
    /// the field named after the id is not a base64 JSON blob.
    pub fn decoded(&self) -> Result<Value, SecurityConfigError> {
        let Value::Object(fields) = &self.source else {
            return Err(SecurityConfigError::NotAnObject(self.id.clone()));
        };

        if fields.len() == 1 {
            if let Some(Value::String(blob)) = fields.get(&self.id) {
                return decode_blob(&self.id, blob);
            }
        }

        let mut out = Map::new();
        for (field, value) in fields {
            let decoded = match value {
                Value::String(blob) if field == &self.id => decode_blob(field, blob)?,
                Value::String(blob) => decode_blob(field, blob).unwrap_or_else(|_| value.clone()),
                other => other.clone(),
            };
            out.insert(field.clone(), decoded);
        }
        Ok(Value::Object(out))
    }
}

fn decode_blob(field: &str, blob: &str) -> Result<Value, SecurityConfigError> {
    let bytes = STANDARD
        .decode(blob.trim())
        .map_err(|source| SecurityConfigError::Base64 {
            field: field.to_string(),
            source,
        })?;
    serde_json::from_slice(&bytes).map_err(|source| SecurityConfigError::Json {
        field: field.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_single_typed_blob() {
        let users = json!({"admin": {"hash": "$2y$12$abc", "reserved": true}});
        let doc = SecurityConfigDoc::encode(ConfigType::InternalUsers, &users);

        assert_eq!(doc.id(), "internalusers");
        assert_eq!(doc.config_type(), Some(ConfigType::InternalUsers));
        assert!(doc.source()["internalusers"]
            .as_str()
            .unwrap()
            .starts_with("eyJ"));
        assert_eq!(doc.decoded().unwrap(), users);
    }

    #[test]
    fn decodes_mixed_source() {
        let roles = json!({"all_access": {"cluster": ["*"]}});
        let blob = STANDARD.encode(roles.to_string());
        let doc = SecurityConfigDoc::new("roles", json!({"roles": blob, "seq": 7}));

        let decoded = doc.decoded().unwrap();
        assert_eq!(decoded["roles"], roles);
        assert_eq!(decoded["seq"], 7);
    }

    #[test]
    fn corrupt_blob_is_an_error() {
        let doc = SecurityConfigDoc::new("roles", json!({"roles": "not base64!!"}));
        assert!(matches!(
            doc.decoded(),
            Err(SecurityConfigError::Base64 { .. })
        ));

        let doc = SecurityConfigDoc::new("roles", json!({"roles": STANDARD.encode("{oops")}));
        assert!(matches!(doc.decoded(), Err(SecurityConfigError::Json { .. })));
    }

    #[test]
    fn non_object_source() {
        let doc = SecurityConfigDoc::new("config", json!("x"));
        assert!(matches!(
            doc.decoded(),
            Err(SecurityConfigError::NotAnObject(_))
        ));
    }

    #[test]
    fn config_type_names() {
        assert_eq!("RolesMapping".parse::<ConfigType>(), Ok(ConfigType::RolesMapping));
        assert!("unknown".parse::<ConfigType>().is_err());
        assert_eq!(ConfigType::ActionGroups.to_string(), "actiongroups");
    }
}
