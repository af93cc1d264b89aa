//! Closed set of audit categories and a compact set type for filters.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::ConfigError;

/// Category of an audit event.
///
/// The string names are the wire names used in emitted records and in the
/// disabled-categories settings; parsing is case-insensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Request carried headers the security layer refuses.
    BadHeaders,
    /// Authentication failed.
    FailedLogin,
    /// Authenticated principal lacked a privilege.
    MissingPrivileges,
    /// Authenticated principal was granted a privilege.
    GrantedPrivileges,
    /// Attempt to touch the security configuration index directly.
    SecurityIndexAttempt,
    /// TLS handshake or certificate problem.
    SslException,
    /// Authentication succeeded.
    Authenticated,
    /// Index-level administrative operation.
    IndexEvent,
    /// Read of a document on a read-watched index.
    ComplianceDocRead,
    /// Write of a document on a write-watched index.
    ComplianceDocWrite,
    /// Configuration loaded from an external file at start-up.
    ComplianceExternalConfig,
    /// Read of the security configuration from its backing store.
    ComplianceInternalConfigRead,
    /// Write of the security configuration to its backing store.
    ComplianceInternalConfigWrite,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 13] = [
        Category::BadHeaders,
        Category::FailedLogin,
        Category::MissingPrivileges,
        Category::GrantedPrivileges,
        Category::SecurityIndexAttempt,
        Category::SslException,
        Category::Authenticated,
        Category::IndexEvent,
        Category::ComplianceDocRead,
        Category::ComplianceDocWrite,
        Category::ComplianceExternalConfig,
        Category::ComplianceInternalConfigRead,
        Category::ComplianceInternalConfigWrite,
    ];

    /// Returns the wire name of the category.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::BadHeaders => "BAD_HEADERS",
            Category::FailedLogin => "FAILED_LOGIN",
            Category::MissingPrivileges => "MISSING_PRIVILEGES",
            Category::GrantedPrivileges => "GRANTED_PRIVILEGES",
            Category::SecurityIndexAttempt => "OPENDISTRO_SECURITY_INDEX_ATTEMPT",
            Category::SslException => "SSL_EXCEPTION",
            Category::Authenticated => "AUTHENTICATED",
            Category::IndexEvent => "INDEX_EVENT",
            Category::ComplianceDocRead => "COMPLIANCE_DOC_READ",
            Category::ComplianceDocWrite => "COMPLIANCE_DOC_WRITE",
            Category::ComplianceExternalConfig => "COMPLIANCE_EXTERNAL_CONFIG",
            Category::ComplianceInternalConfigRead => "COMPLIANCE_INTERNAL_CONFIG_READ",
            Category::ComplianceInternalConfigWrite => "COMPLIANCE_INTERNAL_CONFIG_WRITE",
        }
    }

    /// Returns `true` for data-access compliance categories.
    ///
    /// Compliance categories are governed by the compliance switch; the
    /// security-outcome categories are not.
    pub fn is_compliance(self) -> bool {
        matches!(
            self,
            Category::ComplianceDocRead
                | Category::ComplianceDocWrite
                | Category::ComplianceExternalConfig
                | Category::ComplianceInternalConfigRead
                | Category::ComplianceInternalConfigWrite
        )
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownCategory(wanted.to_string()))
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A set of categories backed by a bitmask.
///
/// Membership tests are a single mask operation, which keeps filter checks
/// on the request path cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CategorySet(u16);

impl CategorySet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Adds a category to the set.
    pub fn insert(&mut self, category: Category) {
        self.0 |= category.bit();
    }

    /// Returns `true` if the category is in the set.
    pub fn contains(&self, category: Category) -> bool {
        self.0 & category.bit() != 0
    }

    /// Returns `true` if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterates members in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        Category::ALL.iter().copied().filter(|c| self.contains(*c))
    }

    /// Parses a list of category names as written in settings.
    ///
    /// Names are case-insensitive. A single `NONE` entry means the empty
    /// set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCategory`] for any name that is not a
    /// known category.
    pub fn parse_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let mut set = Self::empty();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || name.eq_ignore_ascii_case("NONE") {
                continue;
            }
            set.insert(name.parse()?);
        }
        Ok(set)
    }
}

impl FromIterator<Category> for CategorySet {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        let mut set = Self::empty();
        for category in iter {
            set.insert(category);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_wire_names_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
    }

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!(
            "authenticated".parse::<Category>().unwrap(),
            Category::Authenticated
        );
        assert_eq!(
            " granted_privileges ".parse::<Category>().unwrap(),
            Category::GrantedPrivileges
        );
    }

    #[test]
    fn unknown_category_is_rejected() {
        let err = "NOT_A_CATEGORY".parse::<Category>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCategory(name) if name == "NOT_A_CATEGORY"));
    }

    #[test]
    fn compliance_categories() {
        assert!(Category::ComplianceDocRead.is_compliance());
        assert!(Category::ComplianceInternalConfigWrite.is_compliance());
        assert!(!Category::Authenticated.is_compliance());
        assert!(!Category::FailedLogin.is_compliance());
    }

    #[test]
    fn category_set_membership() {
        let set = CategorySet::parse_names(&["authenticated", "GRANTED_PRIVILEGES"]).unwrap();
        assert!(set.contains(Category::Authenticated));
        assert!(set.contains(Category::GrantedPrivileges));
        assert!(!set.contains(Category::FailedLogin));
        assert_eq!(set.iter().count(), 2);
    }

    #[test]
    fn none_means_empty_set() {
        let set = CategorySet::parse_names(&["NONE"]).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn category_serializes_as_wire_name() {
        let json = serde_json::to_string(&Category::ComplianceDocWrite).unwrap();
        assert_eq!(json, "\"COMPLIANCE_DOC_WRITE\"");
    }
}
