//! Token records returned by session operations and token creation input.
//!
//! Token information comes in tiers that cost increasing numbers of requests:
//!
//! | Tier | Contents | Requests |
//! |------|----------|----------|
//! | [`BulkTokenInfo`] | id, name, last used | one list page for all tokens |
//! | [`StandardTokenInfo`] | bulk + expiration | one more per token |
//! | [`IndividualTokenInfo`] | id, name, created, expiration, permissions | detail page + expiration |
//! | [`CompleteTokenInfo`] | individual + last used | list page + detail page + expiration |

use std::fmt;

use chrono::{Days, NaiveDate};
use serde::{Serialize, Serializer};

use crate::dates;
use crate::permissions::{PermissionKey, PermissionValue, Permissions};

/// Repositories a new token may act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenScope {
    /// Read-only access to public repositories.
    #[default]
    PublicRepositories,
    /// Every repository of the resource owner, including future ones.
    AllRepositories,
    /// Only the named repositories of the resource owner.
    SelectRepositories(Vec<String>),
}

impl TokenScope {
    /// Value of the `install_target` form field.
    #[must_use]
    pub fn install_target(&self) -> &'static str {
        match self {
            Self::PublicRepositories => "none",
            Self::AllRepositories => "all",
            Self::SelectRepositories(_) => "selected",
        }
    }
}

/// When a token expires.
///
/// `Expired` is used when the site reports the token as expired without a
/// date; an unparsable date that does not say so is an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Expires (or expired) on this date.
    On(NaiveDate),
    /// Already expired, date not shown.
    Expired,
}

impl fmt::Display for Expiration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Expired => f.write_str("expired"),
        }
    }
}

impl Serialize for Expiration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Token summary from the token list page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkTokenInfo {
    /// Stable numeric id.
    pub id: u64,
    /// Token name, unique per account.
    pub name: String,
    /// Last-used text as displayed, e.g. "never used".
    pub last_used: String,
}

/// Bulk info plus expiration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandardTokenInfo {
    /// Stable numeric id.
    pub id: u64,
    /// Token name.
    pub name: String,
    /// Last-used text as displayed.
    pub last_used: String,
    /// Expiration.
    pub expires: Expiration,
}

impl StandardTokenInfo {
    pub(crate) fn from_bulk(bulk: BulkTokenInfo, expires: Expiration) -> Self {
        Self {
            id: bulk.id,
            name: bulk.name,
            last_used: bulk.last_used,
            expires,
        }
    }
}

/// Info from a token's own detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndividualTokenInfo {
    /// Stable numeric id.
    pub id: u64,
    /// Token name.
    pub name: String,
    /// Creation date.
    pub created: NaiveDate,
    /// Expiration.
    pub expires: Expiration,
    /// Granted permissions; absent keys are `None`.
    pub permissions: Permissions,
}

/// Everything known about a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompleteTokenInfo {
    /// Stable numeric id.
    pub id: u64,
    /// Token name.
    pub name: String,
    /// Creation date.
    pub created: NaiveDate,
    /// Expiration.
    pub expires: Expiration,
    /// Last-used text as displayed.
    pub last_used: String,
    /// Granted permissions; absent keys are `None`.
    pub permissions: Permissions,
}

impl CompleteTokenInfo {
    pub(crate) fn combine(individual: IndividualTokenInfo, bulk: BulkTokenInfo) -> Self {
        Self {
            id: individual.id,
            name: individual.name,
            created: individual.created,
            expires: individual.expires,
            last_used: bulk.last_used,
            permissions: individual.permissions,
        }
    }
}

/// Input for token creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToken {
    /// Token name.
    pub name: String,
    /// Expiration date. The site allows at most one year ahead.
    pub expires: NaiveDate,
    /// Free-text description.
    pub description: String,
    /// Owner of the resources the token can access; the session user if unset.
    pub resource_owner: Option<String>,
    /// Repositories the token may act on.
    pub scope: TokenScope,
    /// Requested permissions; keys not listed are submitted as `None`.
    pub permissions: Permissions,
}

impl NewToken {
    /// Token with no permissions and public-repository scope.
    #[must_use]
    pub fn new(name: impl Into<String>, expires: NaiveDate) -> Self {
        Self {
            name: name.into(),
            expires,
            description: String::new(),
            resource_owner: None,
            scope: TokenScope::default(),
            permissions: Permissions::new(),
        }
    }

    /// Token expiring `days` days from today.
    #[must_use]
    pub fn expiring_in(name: impl Into<String>, days: u64) -> Self {
        let today = dates::today();
        let expires = today.checked_add_days(Days::new(days)).unwrap_or(today);
        Self::new(name, expires)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the resource owner.
    #[must_use]
    pub fn with_resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    /// Sets the repository scope.
    #[must_use]
    pub fn with_scope(mut self, scope: TokenScope) -> Self {
        self.scope = scope;
        self
    }

    /// Grants one permission.
    #[must_use]
    pub fn with_permission(mut self, key: PermissionKey, value: PermissionValue) -> Self {
        self.permissions.insert(key, value);
        self
    }
}
