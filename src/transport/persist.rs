//! Transport decorator that keeps the cookie jar on disk.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest_cookie_store::CookieStoreMutex;
use tracing::{debug, warn};

use super::{HttpTransport, Page, RequestOptions, TransportError};
use crate::auth::{CookieBlobStore, CookieEncryption, StorageError};

/// Wraps another transport and saves its cookie jar after every request.
///
/// Two sessions must not share a persistence directory: the last writer wins.
pub struct PersistingTransport {
    inner: Arc<dyn HttpTransport>,
    blob: CookieBlobStore,
}

impl std::fmt::Debug for PersistingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistingTransport")
            .field("blob", &self.blob)
            .finish_non_exhaustive()
    }
}

impl PersistingTransport {
    /// Wraps `inner`, persisting into `dir/cookies.bin`.
    #[must_use]
    pub fn new(inner: Arc<dyn HttpTransport>, dir: &Path, encryption: CookieEncryption) -> Self {
        Self {
            inner,
            blob: CookieBlobStore::new(dir, encryption),
        }
    }

    /// Replaces the inner jar's contents with the persisted one.
    ///
    /// With `suppress_errors`, an unreadable blob is logged and the jar stays
    /// empty; a missing blob is never an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the blob cannot be read and errors are not
    /// suppressed.
    pub fn load(&self, suppress_errors: bool) -> Result<(), StorageError> {
        match self.blob.load() {
            Ok(Some(store)) => {
                let cookies = self.inner.cookie_store();
                let mut guard = cookies
                    .lock()
                    .map_err(|_| StorageError::Serialization("cookie jar lock poisoned".into()))?;
                *guard = store;
                debug!(path = %self.blob.path().display(), "loaded persisted cookies");
                Ok(())
            }
            Ok(None) => {
                debug!(path = %self.blob.path().display(), "no persisted cookies yet");
                Ok(())
            }
            Err(error) if suppress_errors => {
                warn!(
                    path = %self.blob.path().display(),
                    error = %error,
                    "ignoring unreadable persisted cookies; starting with an empty jar"
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Writes the current jar to disk.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] when the jar cannot be written.
    pub fn save(&self) -> Result<(), StorageError> {
        let cookies = self.inner.cookie_store();
        let guard = cookies
            .lock()
            .map_err(|_| StorageError::Serialization("cookie jar lock poisoned".into()))?;
        self.blob.save(&guard)
    }

    /// Location of the persisted blob.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.blob.path()
    }
}

#[async_trait]
impl HttpTransport for PersistingTransport {
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Page, TransportError> {
        let page = self.inner.get(url, options).await?;
        self.save()?;
        Ok(page)
    }

    async fn post(&self, url: &str, options: RequestOptions) -> Result<Page, TransportError> {
        let page = self.inner.post(url, options).await?;
        self.save()?;
        Ok(page)
    }

    fn cookie_store(&self) -> Arc<CookieStoreMutex> {
        self.inner.cookie_store()
    }

    async fn flush(&self) -> Result<(), TransportError> {
        self.inner.flush().await?;
        self.save()?;
        Ok(())
    }
}

impl Drop for PersistingTransport {
    fn drop(&mut self) {
        if let Err(error) = self.save() {
            warn!(
                path = %self.blob.path().display(),
                error = %error,
                "failed to save cookies on drop"
            );
        }
    }
}
