//! HTTP transport abstraction used by every higher layer.
//!
//! The session talks to the site only through [`HttpTransport`]. Transports
//! compose by wrapping one another:
//!
//! - [`ReqwestTransport`] - base network transport; reads each response fully
//!   into an owned [`Page`] and drops the network response before returning
//! - [`PersistingTransport`] - saves the cookie jar after every request

mod client;
mod persist;

pub use client::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS, ReqwestTransport};
pub use persist::PersistingTransport;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest_cookie_store::CookieStoreMutex;
use thiserror::Error;
use url::Url;

use crate::auth::StorageError;

/// Errors raised by transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection refused, TLS, body read).
    #[error("network error requesting {url}: {source}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The request timed out.
    #[error("timeout requesting {url}")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// Final URL after redirects.
        url: String,
        /// Status code.
        status: u16,
    },

    /// The URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// Offending URL string.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// Persisting the cookie jar after a request failed.
    #[error(transparent)]
    Persist(#[from] StorageError),
}

impl TransportError {
    /// Maps a client error to `Timeout` or `Network`.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }
}

/// Per-request options: query string, form body, referer.
///
/// Pairs are kept ordered and may repeat keys (`repository_ids[]`).
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query string pairs.
    pub query: Vec<(String, String)>,
    /// Form-encoded body pairs (POST only).
    pub form: Vec<(String, String)>,
    /// `Referer` header value.
    pub referer: Option<String>,
}

impl RequestOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options carrying a form body.
    #[must_use]
    pub fn form(form: Vec<(String, String)>) -> Self {
        Self {
            form,
            ..Self::default()
        }
    }

    /// Adds a query pair.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets the `Referer` header.
    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

/// A fully-read response: final URL after redirects, status, and body text.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: Url,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl Page {
    /// Value of a query parameter on the page's final URL.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

/// Minimal HTTP capability surface: GET, POST, cookie jar access.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issues a GET request and reads the whole response.
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Page, TransportError>;

    /// Issues a POST request and reads the whole response.
    async fn post(&self, url: &str, options: RequestOptions) -> Result<Page, TransportError>;

    /// The cookie jar shared with the underlying client.
    fn cookie_store(&self) -> Arc<CookieStoreMutex>;

    /// Flushes any buffered side effects (persisted cookies).
    async fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
