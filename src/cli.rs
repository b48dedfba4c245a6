//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use ghtoken_core::{DEFAULT_BASE_URL, PermissionKey};

/// Default lifetime of created tokens in days.
pub const DEFAULT_EXPIRES_IN_DAYS: u64 = 364;

/// Manage fine-grained personal access tokens through the web interface.
///
/// Logs in with a username and password (plus a one-time password when
/// two-factor authentication is enabled) and lists, inspects, creates, or
/// deletes tokens.
#[derive(Parser, Debug)]
#[command(name = "ghtoken")]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory to persist session cookies in between runs
    #[arg(long, env = "GHTOKEN_PERSIST", global = true)]
    pub persist: Option<PathBuf>,

    /// Username to log in with (prompted if missing)
    #[arg(short, long, env = "GHTOKEN_USERNAME", global = true)]
    pub username: Option<String>,

    /// Password to log in with (keyring or prompt if missing)
    #[arg(long, env = "GHTOKEN_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Site base URL
    #[arg(long, env = "GHTOKEN_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub base_url: String,

    /// Store persisted cookies unencrypted
    #[arg(long, global = true)]
    pub plaintext_cookies: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

/// Top-level commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a token and print its value
    Create(CreateArgs),

    /// List tokens with their expiration dates
    List,

    /// Show one token's details
    Info(InfoArgs),

    /// Delete a token
    Delete(DeleteArgs),

    /// List the permissions tokens can be granted
    PossiblePermissions(PossiblePermissionsArgs),

    /// Log in (if needed) and report whether a login was performed
    Login,
}

/// Arguments of `create`.
#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Token name
    pub name: String,

    /// Repositories the token may access (comma-separated)
    #[arg(
        short = 'r',
        long = "repositories",
        value_delimiter = ',',
        conflicts_with = "all_repositories"
    )]
    pub repositories: Vec<String>,

    /// Grant access to all repositories of the resource owner
    #[arg(short = 'a', long)]
    pub all_repositories: bool,

    /// Permissions to grant read access to (comma-separated identifiers)
    #[arg(short = 'R', long = "read", value_delimiter = ',')]
    pub read: Vec<PermissionKey>,

    /// Permissions to grant write access to (comma-separated identifiers)
    #[arg(short = 'W', long = "write", value_delimiter = ',')]
    pub write: Vec<PermissionKey>,

    /// Token description
    #[arg(long, default_value = "")]
    pub description: String,

    /// User or organization owning the resources (default: the logged-in user)
    #[arg(long)]
    pub resource_owner: Option<String>,

    /// Days until the token expires
    #[arg(long, default_value_t = DEFAULT_EXPIRES_IN_DAYS, conflicts_with = "expires")]
    pub expires_in_days: u64,

    /// Expiration date (YYYY-MM-DD)
    #[arg(long)]
    pub expires: Option<NaiveDate>,
}

/// Selects a token by name or id.
#[derive(Args, Debug, Clone)]
pub struct TokenSelector {
    /// Token name or numeric id
    pub name_or_id: String,

    /// Treat the argument as a name even if it is numeric
    #[arg(long, conflicts_with = "id")]
    pub name: bool,

    /// Treat the argument as an id
    #[arg(long)]
    pub id: bool,
}

/// How a [`TokenSelector`] resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectedToken {
    Id(u64),
    Name(String),
}

impl TokenSelector {
    /// A numeric argument means an id unless `--name` is given.
    pub fn resolve(&self) -> Result<SelectedToken, String> {
        if self.name {
            return Ok(SelectedToken::Name(self.name_or_id.clone()));
        }
        match self.name_or_id.parse::<u64>() {
            Ok(id) => Ok(SelectedToken::Id(id)),
            Err(_) if self.id => Err(format!("{:?} is not a numeric id", self.name_or_id)),
            Err(_) => Ok(SelectedToken::Name(self.name_or_id.clone())),
        }
    }
}

/// Arguments of `info`.
#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    #[command(flatten)]
    pub token: TokenSelector,

    /// Include last-used information (needs one more request)
    #[arg(long)]
    pub complete: bool,
}

/// Arguments of `delete`.
#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub token: TokenSelector,

    /// Exit with status 2 when the token does not exist
    #[arg(long)]
    pub exit_code: bool,
}

/// Arguments of `possible-permissions`.
#[derive(Args, Debug, Clone)]
pub struct PossiblePermissionsArgs {
    /// Read the current list from the site instead of the built-in one
    #[arg(long)]
    pub fetch: bool,

    /// Print the fetched list as enumeration source code
    #[arg(long, requires = "fetch")]
    pub codegen: bool,
}
