//! ghtoken core library
//!
//! Manages fine-grained personal access tokens through the site's web
//! interface: listing, inspecting, creating, and deleting tokens with a
//! username and password session. The web pages may interrupt any request
//! with a login form, a two-factor prompt, or a password confirmation; the
//! session satisfies these transparently.
//!
//! # Architecture
//!
//! - [`session`] - the [`Session`] and its token operations
//! - [`intercept`] - login, two-factor, and password confirmation handling
//! - [`transport`] - HTTP transports and cookie persistence
//! - [`auth`] - credentials, OTP providers, encrypted cookie storage
//! - [`pages`] and [`html`] - page parsers
//! - [`permissions`] and [`token`] - the data model
//! - [`config`] - session configuration and page selectors

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod dates;
pub mod error;
pub mod html;
pub mod intercept;
pub mod pages;
pub mod permissions;
pub mod session;
pub mod token;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use auth::{
    CookieEncryption, Credentials, KeyringCredentialStore, NullOtpProvider,
    ThreadedPromptOtpProvider, TwoFactorOtpProvider, prompt_for_credentials,
};
pub use config::{DEFAULT_BASE_URL, PageSelectors, SessionConfig};
pub use error::{ClientError, LoginFailure, TokenRef};
pub use intercept::InterceptionOutcome;
pub use permissions::{
    AccountPermission, PermissionKey, PermissionValue, Permissions, PossiblePermission,
    PossiblePermissions, RepositoryPermission,
};
pub use session::Session;
pub use token::{
    BulkTokenInfo, CompleteTokenInfo, Expiration, IndividualTokenInfo, NewToken,
    StandardTokenInfo, TokenScope,
};
pub use transport::{HttpTransport, Page, RequestOptions, TransportError};
