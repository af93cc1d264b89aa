//! Assigns intercepted operations to an audit category, or drops them.
//!
//! Every check runs against one captured [`AuditConfig`] snapshot, so a
//! decision never mixes values from two configurations.

use std::fmt;

use crate::category::Category;
use crate::config::AuditConfig;
use crate::context::RequestContext;

/// What an intercepted call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access<'a> {
    /// A document was read from `index`.
    DocRead {
        /// Concrete index name.
        index: &'a str,
    },
    /// A document was created, updated or deleted in `index`.
    DocWrite {
        /// Concrete index name.
        index: &'a str,
    },
    /// The security configuration was read from its backing store.
    InternalConfigRead,
    /// The security configuration was written to its backing store.
    InternalConfigWrite,
    /// Configuration was loaded from an external file.
    ExternalConfig,
    /// A security outcome (authentication, authorization, TLS, ...).
    Security(Category),
}

/// Why an operation produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Auditing is switched off.
    AuditDisabled,
    /// The category is disabled for the request's origin.
    CategoryDisabled,
    /// Compliance auditing is switched off.
    ComplianceDisabled,
    /// Security outcomes from the request's origin are not audited.
    OriginDisabled,
    /// The effective user is excluded.
    IgnoredUser,
    /// The request action is excluded.
    IgnoredRequest,
    /// The index is not watched for this kind of access.
    NotWatched,
    /// Security configuration access is not audited.
    InternalConfigDisabled,
    /// External configuration loads are not audited.
    ExternalConfigDisabled,
}

impl DropReason {
    /// Short reason name used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::AuditDisabled => "audit_disabled",
            DropReason::CategoryDisabled => "category_disabled",
            DropReason::ComplianceDisabled => "compliance_disabled",
            DropReason::OriginDisabled => "origin_disabled",
            DropReason::IgnoredUser => "ignored_user",
            DropReason::IgnoredRequest => "ignored_request",
            DropReason::NotWatched => "not_watched",
            DropReason::InternalConfigDisabled => "internal_config_disabled",
            DropReason::ExternalConfigDisabled => "external_config_disabled",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Emit an event of this category.
    Audit(Category),
    /// Emit nothing.
    Drop(DropReason),
}

impl Decision {
    /// The category, if the operation is audited.
    pub fn category(self) -> Option<Category> {
        match self {
            Decision::Audit(category) => Some(category),
            Decision::Drop(_) => None,
        }
    }
}

/// Classifies operations against one configuration snapshot.
///
/// # Examples
///
/// ```
/// use compliance_audit::classify::{Access, Classifier, Decision};
/// use compliance_audit::{AuditConfig, AuditSettings, Category, Origin, RequestContext};
///
/// let mut settings = AuditSettings::default();
/// settings.compliance.write_watched_indices = vec!["emp".to_string()];
/// let config = AuditConfig::compile(settings).unwrap();
///
/// let ctx = RequestContext::new("req-1", Origin::Rest).with_user("admin");
/// let decision = Classifier::new(&config).classify(&ctx, Access::DocWrite { index: "emp" });
/// assert_eq!(decision, Decision::Audit(Category::ComplianceDocWrite));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Classifier<'a> {
    config: &'a AuditConfig,
}

impl<'a> Classifier<'a> {
    /// Creates a classifier bound to a snapshot.
    pub fn new(config: &'a AuditConfig) -> Self {
        Self { config }
    }

    /// Decides whether `access` is audited and under which category.
    ///
    /// Dropped operations are logged at debug level with the reason.
    pub fn classify(&self, ctx: &RequestContext, access: Access<'_>) -> Decision {
        match self.check(ctx, access) {
            Ok(category) => Decision::Audit(category),
            Err(reason) => {
                ctx.log()
                    .debug(format_args!("audit dropped {access:?}: {reason}"));
                Decision::Drop(reason)
            }
        }
    }

    /// Resolves the category an access would be audited under, ignoring
    /// every filter.
    pub fn category_of(&self, access: Access<'_>) -> Category {
        let security_index = self.config.compliance().security_index();
        match access {
            Access::DocRead { index } if index == security_index => {
                Category::ComplianceInternalConfigRead
            }
            Access::DocWrite { index } if index == security_index => {
                Category::ComplianceInternalConfigWrite
            }
            Access::DocRead { .. } => Category::ComplianceDocRead,
            Access::DocWrite { .. } => Category::ComplianceDocWrite,
            Access::InternalConfigRead => Category::ComplianceInternalConfigRead,
            Access::InternalConfigWrite => Category::ComplianceInternalConfigWrite,
            Access::ExternalConfig => Category::ComplianceExternalConfig,
            Access::Security(category) => category,
        }
    }

    fn check(&self, ctx: &RequestContext, access: Access<'_>) -> Result<Category, DropReason> {
        if !self.config.enabled() {
            return Err(DropReason::AuditDisabled);
        }

        let category = self.category_of(access);
        let filter = self.config.filter();
        if filter.disabled_categories(ctx.origin()).contains(category) {
            return Err(DropReason::CategoryDisabled);
        }

        if category.is_compliance() {
            self.check_compliance(ctx, access, category)?;
        } else {
            if !filter.origin_enabled(ctx.origin()) {
                return Err(DropReason::OriginDisabled);
            }
            if ctx
                .effective_user()
                .is_some_and(|user| filter.ignore_users().matches(user))
            {
                return Err(DropReason::IgnoredUser);
            }
            if ctx
                .action()
                .is_some_and(|action| filter.ignore_requests().matches(action))
            {
                return Err(DropReason::IgnoredRequest);
            }
        }

        Ok(category)
    }

    fn check_compliance(
        &self,
        ctx: &RequestContext,
        access: Access<'_>,
        category: Category,
    ) -> Result<(), DropReason> {
        let compliance = self.config.compliance();
        if !compliance.enabled() {
            return Err(DropReason::ComplianceDisabled);
        }

        let ignored_by = |users: &crate::pattern::Matcher| {
            ctx.effective_user().is_some_and(|user| users.matches(user))
        };

        match category {
            Category::ComplianceDocRead => {
                if ignored_by(compliance.read_ignore_users()) {
                    return Err(DropReason::IgnoredUser);
                }
                let watched = matches!(access, Access::DocRead { index }
                    if compliance.read_watch().watches_index(index));
                if !watched {
                    return Err(DropReason::NotWatched);
                }
            }
            Category::ComplianceDocWrite => {
                if ignored_by(compliance.write_ignore_users()) {
                    return Err(DropReason::IgnoredUser);
                }
                let watched = matches!(access, Access::DocWrite { index }
                    if compliance.is_write_watched(index));
                if !watched {
                    return Err(DropReason::NotWatched);
                }
            }
            Category::ComplianceInternalConfigRead | Category::ComplianceInternalConfigWrite => {
                if !compliance.internal_config() {
                    return Err(DropReason::InternalConfigDisabled);
                }
                let users = if category == Category::ComplianceInternalConfigRead {
                    compliance.read_ignore_users()
                } else {
                    compliance.write_ignore_users()
                };
                if ignored_by(users) {
                    return Err(DropReason::IgnoredUser);
                }
            }
            Category::ComplianceExternalConfig => {
                if !compliance.external_config() {
                    return Err(DropReason::ExternalConfigDisabled);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
