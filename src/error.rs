//! Error types for session and token operations.
//!
//! Every failure surfaced to callers is a [`ClientError`] variant so that the
//! CLI layer can tell "nothing to do" outcomes (missing tokens) apart from
//! authentication failures and from markup drift on the remote site.

use std::fmt;

use thiserror::Error;

use crate::auth::{OtpError, StorageError};
use crate::transport::TransportError;

/// How a login failure was classified from the site's error banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailure {
    /// Username or password rejected.
    IncorrectCredentials,
    /// The site throttled further login attempts.
    TooManyAttempts,
    /// Banner text did not match a known failure phrase.
    Other,
}

impl LoginFailure {
    /// Classifies a banner message by its content.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("incorrect username or password") {
            Self::IncorrectCredentials
        } else if lowered.contains("too many") {
            Self::TooManyAttempts
        } else {
            Self::Other
        }
    }
}

/// Identifies a token by id or by name in not-found errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRef {
    /// Numeric token id.
    Id(u64),
    /// Token name.
    Name(String),
}

impl fmt::Display for TokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "with ID {id}"),
            Self::Name(name) => write!(f, "named {name:?}"),
        }
    }
}

/// Errors returned by [`Session`](crate::Session) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request-level failure (network, timeout, non-success status).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Persisted session state could not be written.
    #[error("failed to persist session cookies: {0}")]
    Storage(#[from] StorageError),

    /// Login or password confirmation was rejected.
    #[error("login failed: {message}")]
    Login {
        /// Banner text shown by the site.
        message: String,
        /// Classification of the banner text.
        failure: LoginFailure,
    },

    /// The one-time password was rejected.
    #[error("two-factor authentication failed: {0}")]
    TwoFactorAuthentication(String),

    /// The account's default second factor is not the authenticator app.
    #[error(
        "ended up on {url}, which indicates that the default 2FA method is not \"authenticator app\"; only authenticator app OTPs are supported and must be the default method"
    )]
    UnsupportedTwoFactorMethod {
        /// Page the login flow was sent to.
        url: String,
    },

    /// The OTP provider could not supply a code.
    #[error(transparent)]
    Otp(#[from] OtpError),

    /// A flow ended on a page outside the known protocol states.
    #[error("ended up on unexpected page {actual} (expected {expected})")]
    UnexpectedPage {
        /// Page that was reached.
        actual: String,
        /// Page that was expected.
        expected: String,
    },

    /// A page was reached but did not have the expected structure.
    #[error("unexpected page content: {0}")]
    UnexpectedContent(String),

    /// A configured CSS selector does not parse.
    #[error("invalid CSS selector: {0}")]
    InvalidSelector(String),

    /// Token creation was rejected by the site.
    #[error("error creating token: {0}")]
    TokenCreation(String),

    /// Token creation was rejected because the name is in use.
    #[error("token name already taken: {0}")]
    TokenNameAlreadyTaken(String),

    /// A repository named in a token scope does not exist.
    #[error("no such repository: {owner}/{name}")]
    RepositoryNotFound {
        /// Repository owner the lookup was scoped to.
        owner: String,
        /// Repository name that was not found.
        name: String,
    },

    /// No token matches the given id or name.
    #[error("no token {0}")]
    TokenNotFound(TokenRef),
}

impl ClientError {
    /// Creates an unexpected-content error.
    pub fn unexpected_content(message: impl Into<String>) -> Self {
        Self::UnexpectedContent(message.into())
    }

    /// Creates a login error, classifying the banner text.
    pub fn login(message: impl Into<String>) -> Self {
        let message = message.into();
        let failure = LoginFailure::classify(&message);
        Self::Login { message, failure }
    }

    /// Creates an unexpected-page error.
    pub fn unexpected_page(actual: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::UnexpectedPage {
            actual: actual.into(),
            expected: expected.into(),
        }
    }

    /// True for missing-token outcomes callers usually treat as "nothing to do".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TokenNotFound(_))
    }

    /// True for rejected logins and rejected password confirmations.
    #[must_use]
    pub fn is_login_error(&self) -> bool {
        matches!(self, Self::Login { .. })
    }

    /// True for any token creation rejection, including name conflicts.
    #[must_use]
    pub fn is_token_creation_error(&self) -> bool {
        matches!(self, Self::TokenCreation(_) | Self::TokenNameAlreadyTaken(_))
    }
}
