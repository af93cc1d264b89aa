//! Precompiled index, field and user matchers.
//!
//! A pattern is one of:
//! - `*`: matches everything
//! - a plain name: exact match
//! - a name containing `*` or `?`: shell-style wildcard
//! - `/.../`: a regular expression that must match the whole candidate
//!
//! Patterns are compiled once when a configuration snapshot is built and
//! never re-parsed on the request path.

use regex::Regex;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
enum Rule {
    Exact(String),
    Regex(Regex),
}

impl Rule {
    fn compile(pattern: &str) -> Result<Self, ConfigError> {
        if pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/') {
            let inner = &pattern[1..pattern.len() - 1];
            return Regex::new(&format!("^(?:{inner})$"))
                .map(Rule::Regex)
                .map_err(|e| ConfigError::invalid_pattern(pattern, e.to_string()));
        }

        if pattern.contains(['*', '?']) {
            let mut source = String::with_capacity(pattern.len() + 8);
            source.push('^');
            for ch in pattern.chars() {
                match ch {
                    '*' => source.push_str(".*"),
                    '?' => source.push('.'),
                    other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
                }
            }
            source.push('$');
            return Regex::new(&source)
                .map(Rule::Regex)
                .map_err(|e| ConfigError::invalid_pattern(pattern, e.to_string()));
        }

        Ok(Rule::Exact(pattern.to_string()))
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Rule::Exact(name) => name == candidate,
            Rule::Regex(re) => re.is_match(candidate),
        }
    }
}

/// A compiled set of patterns; a candidate matches if any pattern does.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    any: bool,
    rules: Vec<Rule>,
    sources: Vec<String>,
}

impl Matcher {
    /// Compiles a list of patterns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] for an empty pattern or a
    /// regular expression that does not compile.
    pub fn compile<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut matcher = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                return Err(ConfigError::invalid_pattern(pattern, "pattern is empty"));
            }
            matcher.sources.push(pattern.to_string());
            if pattern == "*" {
                matcher.any = true;
                continue;
            }
            matcher.rules.push(Rule::compile(pattern)?);
        }
        Ok(matcher)
    }

    /// Returns `true` if the candidate matches any pattern.
    pub fn matches(&self, candidate: &str) -> bool {
        self.any || self.rules.iter().any(|r| r.matches(candidate))
    }

    /// Returns `true` if the dotted path or any of its ancestors matches.
    ///
    /// Watching `customer` therefore also watches `customer.address.city`.
    pub fn matches_path(&self, path: &str) -> bool {
        if self.matches(path) {
            return true;
        }
        path.match_indices('.')
            .any(|(at, _)| self.matches(&path[..at]))
    }

    /// Returns `true` if no pattern was configured.
    pub fn is_empty(&self) -> bool {
        !self.any && self.rules.is_empty()
    }

    /// Returns `true` if this matcher matches everything.
    pub fn is_catch_all(&self) -> bool {
        self.any
    }

    /// The patterns this matcher was built from.
    pub fn patterns(&self) -> &[String] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern() {
        let m = Matcher::compile(["emp"]).unwrap();
        assert!(m.matches("emp"));
        assert!(!m.matches("employees"));
        assert!(!m.matches("Emp"));
    }

    #[test]
    fn wildcard_pattern() {
        let m = Matcher::compile(["emp*", "log-?"]).unwrap();
        assert!(m.matches("emp"));
        assert!(m.matches("employees"));
        assert!(m.matches("log-1"));
        assert!(!m.matches("log-12"));
        assert!(!m.matches("finance"));
    }

    #[test]
    fn wildcard_escapes_regex_metacharacters() {
        let m = Matcher::compile(["a.b*"]).unwrap();
        assert!(m.matches("a.bc"));
        assert!(!m.matches("axbc"));
    }

    #[test]
    fn catch_all_pattern() {
        let m = Matcher::compile(["*"]).unwrap();
        assert!(m.is_catch_all());
        assert!(m.matches("anything"));
        assert!(m.matches(""));
    }

    #[test]
    fn regex_pattern_matches_whole_candidate() {
        let m = Matcher::compile(["/hr-[0-9]+/"]).unwrap();
        assert!(m.matches("hr-2024"));
        assert!(!m.matches("hr-2024-old"));
    }

    #[test]
    fn malformed_regex_is_rejected() {
        let err = Matcher::compile(["/hr-[0-9/"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { .. }));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        assert!(Matcher::compile(["emp", "  "]).is_err());
    }

    #[test]
    fn path_matching_covers_descendants() {
        let m = Matcher::compile(["customer"]).unwrap();
        assert!(m.matches_path("customer"));
        assert!(m.matches_path("customer.address.city"));
        assert!(!m.matches_path("customers.id"));
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        let m = Matcher::default();
        assert!(m.is_empty());
        assert!(!m.matches("emp"));
    }

    #[test]
    fn patterns_keep_sources() {
        let m = Matcher::compile(["kibanaserver", "/adm.n/"]).unwrap();
        assert!(m.matches("kibanaserver"));
        assert_eq!(m.patterns(), ["kibanaserver".to_string(), "/adm.n/".to_string()]);
    }
}
