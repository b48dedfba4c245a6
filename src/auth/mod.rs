//! Authentication inputs and persisted session state.
//!
//! - [`credentials`] - username/password pair, keychain storage, terminal prompt
//! - [`otp`] - one-time password providers for two-factor authentication
//! - [`storage`] - the on-disk cookie jar blob, optionally encrypted

pub mod credentials;
pub mod otp;
mod storage;

pub use credentials::{
    CredentialStoreError, Credentials, KeyringCredentialStore, prompt_for_credentials,
    read_line_prompt,
};
pub use otp::{
    BlockingPromptOtpProvider, NullOtpProvider, OtpError, ThreadedPromptOtpProvider,
    TwoFactorOtpProvider,
};
pub use storage::{
    COOKIE_FILE_NAME, CookieBlobStore, CookieEncryption, MASTER_KEY_ENV, StorageError,
};
