//! Fixed enumeration of fine-grained token permissions.
//!
//! Keys fall into two disjoint groups, account-level and repository-level.
//! Each key carries the identifier used in form fields, the display name, and
//! the values the site allows for it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors parsing permission keys and values from user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionParseError {
    /// No permission key has this identifier.
    #[error("no permission found for string {0:?}")]
    UnknownKey(String),
    /// Not one of `none`, `read`, `write`.
    #[error("invalid permission value {0:?} (expected none, read or write)")]
    UnknownValue(String),
}

/// The extent to which a permission applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionValue {
    /// Not at all.
    #[default]
    None,
    /// Read-only.
    Read,
    /// Read and write.
    Write,
}

impl PermissionValue {
    /// Value as submitted in form fields (`""`, `read`, `write`).
    #[must_use]
    pub fn form_value(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// Parses a form field value.
    #[must_use]
    pub fn from_form_value(value: &str) -> Option<Self> {
        match value {
            "" => Some(Self::None),
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            _ => None,
        }
    }
}

impl fmt::Display for PermissionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

impl FromStr for PermissionValue {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            _ => Err(PermissionParseError::UnknownValue(s.to_string())),
        }
    }
}

macro_rules! permission_group {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => ($id:literal, $full:literal, [$($allowed:ident),+]),)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $(
                #[doc = $full]
                $variant,
            )+
        }

        impl $name {
            /// Every key of this group, in display order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// Identifier used in form field names.
            #[must_use]
            pub fn identifier(self) -> &'static str {
                match self {
                    $(Self::$variant => $id,)+
                }
            }

            /// Display name shown on the site.
            #[must_use]
            pub fn full_name(self) -> &'static str {
                match self {
                    $(Self::$variant => $full,)+
                }
            }

            /// Values the site accepts for this key.
            #[must_use]
            pub fn allowed_values(self) -> &'static [PermissionValue] {
                match self {
                    $(Self::$variant => &[$(PermissionValue::$allowed),+],)+
                }
            }

            /// Looks up a key by identifier.
            #[must_use]
            pub fn from_identifier(identifier: &str) -> Option<Self> {
                match identifier {
                    $($id => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

permission_group! {
    /// Repository-level permissions.
    RepositoryPermission {
        Actions => ("actions", "Actions", [None, Read, Write]),
        Administration => ("administration", "Administration", [None, Read, Write]),
        SecurityEvents => ("security_events", "Code scanning alerts", [None, Read, Write]),
        Codespaces => ("codespaces", "Codespaces", [None, Read, Write]),
        CodespacesLifecycleAdmin => ("codespaces_lifecycle_admin", "Codespaces lifecycle admin", [None, Read, Write]),
        CodespacesMetadata => ("codespaces_metadata", "Codespaces metadata", [None, Read]),
        CodespacesSecrets => ("codespaces_secrets", "Codespaces secrets", [None, Write]),
        Statuses => ("statuses", "Commit statuses", [None, Read, Write]),
        Contents => ("contents", "Contents", [None, Read, Write]),
        VulnerabilityAlerts => ("vulnerability_alerts", "Dependabot alerts", [None, Read, Write]),
        DependabotSecrets => ("dependabot_secrets", "Dependabot secrets", [None, Read, Write]),
        Deployments => ("deployments", "Deployments", [None, Read, Write]),
        Discussions => ("discussions", "Discussions", [None, Read, Write]),
        Environments => ("environments", "Environments", [None, Read, Write]),
        Issues => ("issues", "Issues", [None, Read, Write]),
        MergeQueues => ("merge_queues", "Merge queues", [None, Read, Write]),
        Metadata => ("metadata", "Metadata", [None, Read]),
        Pages => ("pages", "Pages", [None, Read, Write]),
        PullRequests => ("pull_requests", "Pull requests", [None, Read, Write]),
        RepositoryAdvisories => ("repository_advisories", "Repository security advisories", [None, Read, Write]),
        SecretScanningAlerts => ("secret_scanning_alerts", "Secret scanning alerts", [None, Read, Write]),
        Secrets => ("secrets", "Secrets", [None, Read, Write]),
        ActionsVariables => ("actions_variables", "Variables", [None, Read, Write]),
        RepositoryHooks => ("repository_hooks", "Webhooks", [None, Read, Write]),
        Workflows => ("workflows", "Workflows", [None, Write]),
    }
}

permission_group! {
    /// Account-level permissions.
    AccountPermission {
        Blocking => ("blocking", "Block another user", [None, Read, Write]),
        CodespacesUserSecrets => ("codespaces_user_secrets", "Codespaces user secrets", [None, Read, Write]),
        Emails => ("emails", "Email addresses", [None, Read, Write]),
        Followers => ("followers", "Followers", [None, Read, Write]),
        GpgKeys => ("gpg_keys", "GPG keys", [None, Read, Write]),
        Gists => ("gists", "Gists", [None, Write]),
        Keys => ("keys", "Git SSH keys", [None, Read, Write]),
        InteractionLimits => ("interaction_limits", "Interaction limits", [None, Read, Write]),
        Plan => ("plan", "Plan", [None, Read]),
        PrivateRepositoryInvitations => ("private_repository_invitations", "Private repository invitations", [None, Read]),
        Profile => ("profile", "Profile", [None, Write]),
        GitSigningSshPublicKeys => ("git_signing_ssh_public_keys", "SSH signing keys", [None, Read, Write]),
        Starring => ("starring", "Starring", [None, Read, Write]),
        Watching => ("watching", "Watching", [None, Read, Write]),
    }
}

/// Any permission key, account-level or repository-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PermissionKey {
    /// Account-level key.
    Account(AccountPermission),
    /// Repository-level key.
    Repository(RepositoryPermission),
}

/// A token's permission mapping. Keys absent from the map mean `None`.
pub type Permissions = BTreeMap<PermissionKey, PermissionValue>;

impl PermissionKey {
    /// All keys in form submission order: account keys, then repository keys.
    #[must_use]
    pub fn all() -> Vec<Self> {
        AccountPermission::ALL
            .iter()
            .copied()
            .map(Self::Account)
            .chain(RepositoryPermission::ALL.iter().copied().map(Self::Repository))
            .collect()
    }

    /// Looks up a key by identifier in either group.
    #[must_use]
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        AccountPermission::from_identifier(identifier)
            .map(Self::Account)
            .or_else(|| RepositoryPermission::from_identifier(identifier).map(Self::Repository))
    }

    /// Identifier used in form field names.
    #[must_use]
    pub fn identifier(self) -> &'static str {
        match self {
            Self::Account(key) => key.identifier(),
            Self::Repository(key) => key.identifier(),
        }
    }

    /// Display name shown on the site.
    #[must_use]
    pub fn full_name(self) -> &'static str {
        match self {
            Self::Account(key) => key.full_name(),
            Self::Repository(key) => key.full_name(),
        }
    }

    /// Values the site accepts for this key.
    #[must_use]
    pub fn allowed_values(self) -> &'static [PermissionValue] {
        match self {
            Self::Account(key) => key.allowed_values(),
            Self::Repository(key) => key.allowed_values(),
        }
    }

    /// Form field name: `integration[default_permissions][<identifier>]`.
    #[must_use]
    pub fn form_field(self) -> String {
        format!("integration[default_permissions][{}]", self.identifier())
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for PermissionKey {
    type Err = PermissionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_identifier(s.trim())
            .ok_or_else(|| PermissionParseError::UnknownKey(s.to_string()))
    }
}

impl Serialize for PermissionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.identifier())
    }
}

/// A permission as declared by the token creation form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PossiblePermission {
    /// Form identifier.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Help text shown under the name.
    pub description: String,
    /// Values offered by the form.
    pub allowed_values: Vec<PermissionValue>,
}

/// Permission groups declared by the token creation form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PossiblePermissions {
    /// Repository-level permissions.
    pub repository: Vec<PossiblePermission>,
    /// Account-level permissions.
    pub account: Vec<PossiblePermission>,
}

impl PossiblePermissions {
    /// The built-in enumeration, without descriptions.
    #[must_use]
    pub fn from_known() -> Self {
        fn known(key: PermissionKey) -> PossiblePermission {
            PossiblePermission {
                identifier: key.identifier().to_string(),
                name: key.full_name().to_string(),
                description: String::new(),
                allowed_values: key.allowed_values().to_vec(),
            }
        }
        Self {
            repository: RepositoryPermission::ALL
                .iter()
                .map(|key| known(PermissionKey::Repository(*key)))
                .collect(),
            account: AccountPermission::ALL
                .iter()
                .map(|key| known(PermissionKey::Account(*key)))
                .collect(),
        }
    }

    /// Renders the groups as `permission_group!` invocations, for updating the
    /// enumeration after the site adds or changes permissions.
    #[must_use]
    pub fn to_enum_source(&self) -> String {
        let mut out = String::new();
        for (doc, name, group) in [
            ("Repository-level permissions.", "RepositoryPermission", &self.repository),
            ("Account-level permissions.", "AccountPermission", &self.account),
        ] {
            out.push_str("permission_group! {\n");
            out.push_str(&format!("    /// {doc}\n    {name} {{\n"));
            for permission in group {
                let allowed = permission
                    .allowed_values
                    .iter()
                    .map(|value| format!("{value:?}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                out.push_str(&format!(
                    "        {} => ({:?}, {:?}, [{allowed}]),\n",
                    variant_name(&permission.identifier),
                    permission.identifier,
                    permission.name,
                ));
            }
            out.push_str("    }\n}\n");
        }
        out
    }
}

fn variant_name(identifier: &str) -> String {
    identifier
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect()
}
