//! Base network transport backed by `reqwest`.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::REFERER;
use reqwest::{Client, ClientBuilder, Proxy};
use reqwest_cookie_store::CookieStoreMutex;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{HttpTransport, Page, RequestOptions, TransportError};
use crate::user_agent;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default whole-request timeout.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Network transport with a shared, serializable cookie jar.
///
/// Redirects are followed (reqwest's default policy) and the resulting
/// [`Page::url`] is the final URL, which is what interception detection keys on.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    cookies: Arc<CookieStoreMutex>,
}

impl ReqwestTransport {
    /// Creates a transport with a fresh, empty cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the client cannot be constructed.
    pub fn new(connect_timeout_secs: u64, read_timeout_secs: u64) -> Result<Self, TransportError> {
        Self::with_cookie_store(
            Arc::new(CookieStoreMutex::new(cookie_store::CookieStore::default())),
            connect_timeout_secs,
            read_timeout_secs,
        )
    }

    /// Creates a transport around an existing cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the client cannot be constructed.
    pub fn with_cookie_store(
        cookies: Arc<CookieStoreMutex>,
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, TransportError> {
        let client = build_client(&cookies, connect_timeout_secs, read_timeout_secs)?;
        Ok(Self { client, cookies })
    }

    async fn read_page(url: &str, response: reqwest::Response) -> Result<Page, TransportError> {
        let status = response.status();
        let final_url = response.url().clone();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                url: final_url.to_string(),
                status: status.as_u16(),
            });
        }
        // Consuming the body releases the connection back to the pool.
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        debug!(url = %final_url, status = status.as_u16(), bytes = body.len(), "response read");
        Ok(Page {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(level = "debug", skip(self, options), fields(method = "GET"))]
    async fn get(&self, url: &str, options: RequestOptions) -> Result<Page, TransportError> {
        let parsed = Url::parse(url).map_err(|_| TransportError::InvalidUrl { url: url.into() })?;
        let mut request = self.client.get(parsed);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(referer) = &options.referer {
            request = request.header(REFERER, referer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        Self::read_page(url, response).await
    }

    #[instrument(level = "debug", skip(self, options), fields(method = "POST"))]
    async fn post(&self, url: &str, options: RequestOptions) -> Result<Page, TransportError> {
        let parsed = Url::parse(url).map_err(|_| TransportError::InvalidUrl { url: url.into() })?;
        let mut request = self.client.post(parsed).form(&options.form);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(referer) = &options.referer {
            request = request.header(REFERER, referer);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;
        Self::read_page(url, response).await
    }

    fn cookie_store(&self) -> Arc<CookieStoreMutex> {
        Arc::clone(&self.cookies)
    }
}

fn build_client(
    cookies: &Arc<CookieStoreMutex>,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<Client, TransportError> {
    let primary = catch_unwind(AssertUnwindSafe(|| {
        base_builder(cookies, connect_timeout_secs, read_timeout_secs).build()
    }));
    match primary {
        Ok(built) => built.map_err(TransportError::Build),
        Err(_) => {
            // System proxy lookup panics in some sandboxed environments.
            warn!("HTTP client builder panicked while loading system proxy settings; using env proxies only");
            apply_env_proxies(
                base_builder(cookies, connect_timeout_secs, read_timeout_secs).no_proxy(),
            )
            .build()
            .map_err(TransportError::Build)
        }
    }
}

fn base_builder(
    cookies: &Arc<CookieStoreMutex>,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .gzip(true)
        .user_agent(user_agent::default_user_agent())
        .cookie_provider(Arc::clone(cookies))
}

fn apply_env_proxies(mut builder: ClientBuilder) -> ClientBuilder {
    let candidates = [
        ("https", ["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        ("http", ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
    ];
    for (scheme, names) in candidates {
        let Some(proxy) = first_env_value(&names) else {
            continue;
        };
        let resolved = if scheme == "https" {
            Proxy::https(&proxy)
        } else {
            Proxy::http(&proxy)
        };
        if let Ok(resolved) = resolved {
            builder = builder.proxy(resolved);
        }
    }
    builder
}

fn first_env_value(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
