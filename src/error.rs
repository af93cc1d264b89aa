use thiserror::Error;

use crate::resolve::ResolveError;

/// Errors that can surface from the compliance audit crate.
///
/// None of these ever fail the audited data-plane operation; they are
/// returned to administrative callers (config updates, resolver users,
/// emitter start-up) only.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration update was rejected.
    #[error("audit configuration rejected: {0}")]
    Config(#[from] ConfigError),

    /// A composite request body could not be expanded.
    #[error("composite request could not be resolved: {0}")]
    Resolve(#[from] ResolveError),

    /// The emitter worker thread could not be started.
    #[error("failed to start audit emitter: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Rejection reasons for an audit configuration.
///
/// When any of these is returned the previously active configuration stays
/// in place.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A watch or ignore pattern could not be compiled.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern as written in the settings.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A category name in a disabled-categories list is not known.
    #[error("unknown audit category '{0}'")]
    UnknownCategory(String),

    /// A setting has a value outside its allowed range.
    #[error("invalid value for '{key}': {reason}")]
    InvalidSetting {
        /// Settings key.
        key: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The settings document is not valid JSON.
    #[error("settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The settings document is not valid YAML.
    #[error("settings are not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    pub(crate) fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_names_pattern() {
        let err = ConfigError::invalid_pattern("/[/", "unclosed character class");
        let text = err.to_string();
        assert!(text.contains("/[/"));
        assert!(text.contains("unclosed"));
    }

    #[test]
    fn crate_error_wraps_config_error() {
        let err: Error = ConfigError::UnknownCategory("BOGUS".to_string()).into();
        assert!(matches!(err, Error::Config(ConfigError::UnknownCategory(_))));
        assert!(err.to_string().contains("BOGUS"));
    }
}
