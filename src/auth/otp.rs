//! One-time password providers for two-factor authentication.
//!
//! Only authenticator-app codes are supported. A provider may wait on a human
//! for as long as it takes; it must never return a code it did not obtain.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use thiserror::Error;

use super::credentials::read_line_prompt;

/// Failure to obtain a one-time password.
#[derive(Debug, Error)]
pub enum OtpError {
    /// Two-factor authentication was required but no provider is configured.
    #[error("OTP for two-factor authentication requested for user {0:?}, but no OTP provider configured")]
    NotConfigured(String),
    /// The user entered nothing.
    #[error("empty one-time password entered")]
    Empty,
    /// The terminal could not be read.
    #[error("failed to read one-time password: {0}")]
    Io(#[from] io::Error),
    /// The prompt thread died.
    #[error("one-time password prompt failed: {0}")]
    Prompt(String),
}

/// Supplies one-time passwords for a username.
#[async_trait]
pub trait TwoFactorOtpProvider: Send + Sync {
    /// One-time password for `username`.
    async fn otp_for_user(&self, username: &str) -> Result<String, OtpError>;
}

/// Fails whenever a code is requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOtpProvider;

#[async_trait]
impl TwoFactorOtpProvider for NullOtpProvider {
    async fn otp_for_user(&self, username: &str) -> Result<String, OtpError> {
        Err(OtpError::NotConfigured(username.to_string()))
    }
}

/// Prompts on the terminal, blocking the calling thread until answered.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingPromptOtpProvider;

#[async_trait]
impl TwoFactorOtpProvider for BlockingPromptOtpProvider {
    async fn otp_for_user(&self, username: &str) -> Result<String, OtpError> {
        prompt_for_otp(&mut io::stdin().lock(), &mut io::stderr(), username)
    }
}

/// Prompts on the terminal from tokio's blocking thread pool, so other tasks
/// keep running while waiting for input.
///
/// The prompt cannot be cancelled: dropping the future does not stop the read,
/// and runtime shutdown waits for the blocking thread until a line is entered
/// or stdin closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadedPromptOtpProvider;

#[async_trait]
impl TwoFactorOtpProvider for ThreadedPromptOtpProvider {
    async fn otp_for_user(&self, username: &str) -> Result<String, OtpError> {
        let username = username.to_string();
        tokio::task::spawn_blocking(move || {
            prompt_for_otp(&mut io::stdin().lock(), &mut io::stderr(), &username)
        })
        .await
        .map_err(|e| OtpError::Prompt(e.to_string()))?
    }
}

/// Writes the OTP prompt for `username` and reads one line as the code.
///
/// # Errors
///
/// Returns [`OtpError::Empty`] for a blank line and [`OtpError::Io`] when
/// reading fails.
pub fn prompt_for_otp<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    username: &str,
) -> Result<String, OtpError> {
    let line = read_line_prompt(reader, writer, &format!("2FA OTP for user {username:?}: "))?;
    let code = line.trim().to_string();
    if code.is_empty() {
        return Err(OtpError::Empty);
    }
    Ok(code)
}
