//! Login credentials and where they come from.

use std::fmt;
use std::io::{self, BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tracing::debug;
use url::Url;

/// Username and password used for login and password confirmation.
///
/// Replaced wholesale on a session when retrying with different credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account username.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The system keychain could not be used.
#[derive(Debug, Error)]
#[error("system keychain unavailable: {0}")]
pub struct CredentialStoreError(String);

/// Passwords saved in the system keychain, one entry per username.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    /// Store whose service name is derived from the site's host.
    #[must_use]
    pub fn for_base_url(base_url: &str) -> Self {
        let host = Url::parse(base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| base_url.to_string());
        Self {
            service: format!("ghtoken:{host}"),
        }
    }

    /// Keychain service name.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Saved password for `username`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError`] when the keychain cannot be reached.
    pub fn load_password(&self, username: &str) -> Result<Option<String>, CredentialStoreError> {
        let entry = self.entry(username)?;
        match catch_unwind(AssertUnwindSafe(|| entry.get_password())) {
            Ok(Ok(password)) => Ok(Some(password)),
            Ok(Err(keyring::Error::NoEntry)) => Ok(None),
            Ok(Err(error)) => Err(CredentialStoreError(error.to_string())),
            Err(_) => Err(CredentialStoreError("keychain backend panicked".into())),
        }
    }

    /// Saves the password for the credentials' username.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError`] when the keychain cannot be written.
    pub fn save(&self, credentials: &Credentials) -> Result<(), CredentialStoreError> {
        let entry = self.entry(&credentials.username)?;
        catch_unwind(AssertUnwindSafe(|| entry.set_password(&credentials.password)))
            .map_err(|_| CredentialStoreError("keychain backend panicked".into()))?
            .map_err(|error| CredentialStoreError(error.to_string()))?;
        debug!(
            service = %self.service,
            username = %credentials.username,
            "saved password to keychain"
        );
        Ok(())
    }

    fn entry(&self, username: &str) -> Result<keyring::Entry, CredentialStoreError> {
        // keyring backends can panic on headless systems
        catch_unwind(|| keyring::Entry::new(&self.service, username))
            .map_err(|_| CredentialStoreError("keychain backend panicked".into()))?
            .map_err(|error| CredentialStoreError(error.to_string()))
    }
}

/// Prompts on the terminal for whatever part of the credentials is missing.
///
/// The username is read as a line from stdin, the password without echo.
///
/// # Errors
///
/// Returns an I/O error when the terminal cannot be read.
pub fn prompt_for_credentials(username: Option<&str>) -> io::Result<Credentials> {
    let username = match username {
        Some(username) => username.to_string(),
        None => read_line_prompt(&mut io::stdin().lock(), &mut io::stderr(), "github username: ")?,
    };
    let password = rpassword::prompt_password("github password: ")?;
    Ok(Credentials::new(username, password))
}

/// Writes `prompt` and reads one line, without its line ending.
///
/// # Errors
///
/// Returns [`io::ErrorKind::UnexpectedEof`] when the input is closed.
pub fn read_line_prompt<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
    prompt: &str,
) -> io::Result<String> {
    write!(writer, "{prompt}")?;
    writer.flush()?;
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no input"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("octocat", "hunter2"));
        assert!(debug.contains("octocat"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_service_name_uses_host() {
        assert_eq!(
            KeyringCredentialStore::for_base_url("https://github.com").service(),
            "ghtoken:github.com"
        );
        assert_eq!(
            KeyringCredentialStore::for_base_url("not a url").service(),
            "ghtoken:not a url"
        );
    }

    #[test]
    fn test_read_line_prompt_writes_prompt_and_strips_newline() {
        let mut input = io::Cursor::new(b"octocat\r\n".to_vec());
        let mut output = Vec::new();
        let line = read_line_prompt(&mut input, &mut output, "user: ").unwrap();
        assert_eq!(line, "octocat");
        assert_eq!(output, b"user: ");
    }

    #[test]
    fn test_read_line_prompt_eof_is_error() {
        let mut input = io::Cursor::new(Vec::new());
        let error = read_line_prompt(&mut input, &mut Vec::new(), "user: ").unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }
}
