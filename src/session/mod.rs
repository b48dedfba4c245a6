//! Authenticated session against the token settings pages.
//!
//! A [`Session`] owns the transport chain, the credentials, the OTP provider,
//! and the configuration. Every public operation runs under the session's
//! operation guard, so at most one is in flight per session; separate sessions
//! do not contend. Operations log through
//! [`SessionConfig::log_dispatch`] when one is set.

mod tokens;

use std::future::Future;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info};

use crate::auth::{Credentials, TwoFactorOtpProvider};
use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::intercept::{InterceptionOutcome, Interceptor, LOGIN_PATH};
use crate::transport::{HttpTransport, PersistingTransport, ReqwestTransport, RequestOptions};

/// An authenticated web session.
pub struct Session {
    transport: Arc<dyn HttpTransport>,
    credentials: RwLock<Arc<Credentials>>,
    otp_provider: Arc<dyn TwoFactorOtpProvider>,
    config: SessionConfig,
    op_guard: Mutex<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.config.base_url)
            .field("credentials", &self.credentials())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Opens a session over a fresh network transport.
    ///
    /// With a persistence directory configured, previously saved cookies are
    /// loaded; an unreadable blob is logged and the session starts cold.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if a selector is invalid or the HTTP client
    /// cannot be built.
    pub fn open(
        credentials: Credentials,
        otp_provider: Arc<dyn TwoFactorOtpProvider>,
        config: SessionConfig,
    ) -> Result<Self, ClientError> {
        let base = ReqwestTransport::new(config.connect_timeout_secs, config.read_timeout_secs)?;
        Self::with_transport(Arc::new(base), credentials, otp_provider, config)
    }

    /// Opens a session over a caller-supplied transport. Persistence, if
    /// configured, is layered on top of it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSelector`] if a configured selector does
    /// not parse.
    pub fn with_transport(
        transport: Arc<dyn HttpTransport>,
        credentials: Credentials,
        otp_provider: Arc<dyn TwoFactorOtpProvider>,
        config: SessionConfig,
    ) -> Result<Self, ClientError> {
        config.selectors.validate()?;
        let transport = match &config.persist_dir {
            Some(dir) => {
                let persisting =
                    PersistingTransport::new(transport, dir, config.cookie_encryption.clone());
                match &config.log_dispatch {
                    Some(dispatch) => {
                        tracing::dispatcher::with_default(dispatch, || persisting.load(true))?;
                    }
                    None => persisting.load(true)?,
                }
                Arc::new(persisting) as Arc<dyn HttpTransport>
            }
            None => transport,
        };
        Ok(Self {
            transport,
            credentials: RwLock::new(Arc::new(credentials)),
            otp_provider,
            config,
            op_guard: Mutex::new(()),
        })
    }

    /// Flushes persisted cookies and ends the session.
    ///
    /// Dropping a session also saves cookies, but silently; `close` reports
    /// failures.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the cookie jar cannot be written.
    pub async fn close(self) -> Result<(), ClientError> {
        let transport = Arc::clone(&self.transport);
        self.guarded(async move {
            transport.flush().await?;
            debug!("session closed");
            Ok(())
        })
        .await
    }

    /// Configuration the session was opened with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current credentials.
    #[must_use]
    pub fn credentials(&self) -> Arc<Credentials> {
        match self.credentials.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replaces the credentials used by subsequent operations. Waits for an
    /// in-flight operation to finish first.
    pub async fn set_credentials(&self, credentials: Credentials) {
        let _guard = self.op_guard.lock().await;
        let replacement = Arc::new(credentials);
        match self.credentials.write() {
            Ok(mut guard) => *guard = replacement,
            Err(poisoned) => *poisoned.into_inner() = replacement,
        }
    }

    /// Logs in if the session is not already logged in.
    ///
    /// Requests the login page and satisfies login and two-factor
    /// interception. Returns whether a login form was actually submitted.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Login`] for rejected credentials and the other
    /// interception errors for unexpected flows.
    pub async fn login(&self) -> Result<bool, ClientError> {
        self.guarded(self.perform_login()).await
    }

    /// GET a site path with interception handling.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] for transport and interception failures.
    pub async fn authenticated_get(&self, path: &str) -> Result<InterceptionOutcome, ClientError> {
        self.guarded(async {
            let credentials = self.credentials();
            self.interceptor(&credentials)
                .get(path, RequestOptions::new())
                .await
        })
        .await
    }

    /// POST a form to a site path with interception handling.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] for transport and interception failures.
    pub async fn authenticated_post(
        &self,
        path: &str,
        form: Vec<(String, String)>,
    ) -> Result<InterceptionOutcome, ClientError> {
        self.guarded(async {
            let credentials = self.credentials();
            self.interceptor(&credentials)
                .post(path, RequestOptions::form(form))
                .await
        })
        .await
    }

    async fn perform_login(&self) -> Result<bool, ClientError> {
        let credentials = self.credentials();
        let page = self
            .transport
            .get(&self.config.url(LOGIN_PATH), RequestOptions::new())
            .await?;
        let performed = self.interceptor(&credentials).handle_login_only(page).await?;
        if !performed {
            info!("already logged in");
        }
        Ok(performed)
    }

    /// Runs `operation` under the operation guard and the configured
    /// subscriber.
    async fn guarded<T>(
        &self,
        operation: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let _guard = self.op_guard.lock().await;
        match &self.config.log_dispatch {
            Some(dispatch) => operation.with_subscriber(dispatch.clone()).await,
            None => operation.await,
        }
    }

    fn interceptor<'a>(&'a self, credentials: &'a Credentials) -> Interceptor<'a> {
        Interceptor {
            transport: self.transport.as_ref(),
            config: &self.config,
            credentials,
            otp_provider: self.otp_provider.as_ref(),
        }
    }
}
