//! Detection and satisfaction of interception pages.
//!
//! The site may answer any request with a page that demands an extra step
//! first. Every authenticated request runs its response through three stages,
//! always in this order:
//!
//! 1. login (the final URL is on the login page)
//! 2. two-factor authentication (the final URL is the authenticator-app challenge)
//! 3. password confirmation (the page carries the confirmation heading, either
//!    after a redirect to the dedicated endpoint or embedded in the response
//!    to the request that needed it)
//!
//! Each stage is a no-op when its trigger is absent and otherwise submits the
//! required form and hands the resulting page to the next stage. No stage
//! retries; every failure ends the calling operation.

use tracing::{info, instrument};

use crate::auth::{Credentials, TwoFactorOtpProvider};
use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::html::{
    HiddenFields, flash_banner, is_password_confirmation_page, page_hidden_fields,
    select_password_confirmation_form,
};
use crate::transport::{HttpTransport, Page, RequestOptions};

pub(crate) const LOGIN_PATH: &str = "/login";
pub(crate) const SESSION_PATH: &str = "/session";
pub(crate) const TWO_FACTOR_PREFIX: &str = "/sessions/two-factor";
pub(crate) const TWO_FACTOR_APP_PATH: &str = "/sessions/two-factor/app";
pub(crate) const PASSWORD_CONFIRMATION_PREFIX: &str = "/sessions/sudo";

/// Result of one request after interception handling.
#[derive(Debug, Clone)]
pub struct InterceptionOutcome {
    /// A login form was submitted.
    pub performed_login: bool,
    /// A one-time password was submitted.
    pub performed_two_factor: bool,
    /// The password was re-submitted for confirmation.
    pub performed_password_confirmation: bool,
    /// The page answering the original request.
    pub page: Page,
}

/// Runs interception stages for one operation.
///
/// Borrows everything from the session; the page being reasoned about is
/// always passed explicitly from stage to stage.
pub(crate) struct Interceptor<'a> {
    pub(crate) transport: &'a dyn HttpTransport,
    pub(crate) config: &'a SessionConfig,
    pub(crate) credentials: &'a Credentials,
    pub(crate) otp_provider: &'a dyn TwoFactorOtpProvider,
}

impl Interceptor<'_> {
    fn url(&self, path: &str) -> String {
        self.config.url(path)
    }

    fn on_path(&self, page: &Page, path: &str) -> bool {
        page.url.as_str() == self.url(path)
    }

    fn under_path(&self, page: &Page, prefix: &str) -> bool {
        page.url.as_str().starts_with(&self.url(prefix))
    }

    /// GET `path` and satisfy any interception.
    pub(crate) async fn get(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<InterceptionOutcome, ClientError> {
        let page = self.transport.get(&self.url(path), options).await?;
        self.handle(page).await
    }

    /// POST `path` and satisfy any interception.
    pub(crate) async fn post(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<InterceptionOutcome, ClientError> {
        let page = self.transport.post(&self.url(path), options).await?;
        self.handle(page).await
    }

    /// Login, then two-factor, then password confirmation.
    pub(crate) async fn handle(&self, page: Page) -> Result<InterceptionOutcome, ClientError> {
        let (performed_login, page) = self.handle_login(page).await?;
        let (performed_two_factor, page) = self.handle_two_factor(page).await?;
        let (performed_password_confirmation, page) =
            self.handle_password_confirmation(page).await?;
        Ok(InterceptionOutcome {
            performed_login,
            performed_two_factor,
            performed_password_confirmation,
            page,
        })
    }

    /// Login and two-factor only. A confirmation page cannot answer a request
    /// for the login page itself.
    pub(crate) async fn handle_login_only(&self, page: Page) -> Result<bool, ClientError> {
        let (performed_login, page) = self.handle_login(page).await?;
        self.handle_two_factor(page).await?;
        Ok(performed_login)
    }

    #[instrument(level = "debug", skip_all, fields(url = %page.url))]
    pub(crate) async fn handle_login(&self, page: Page) -> Result<(bool, Page), ClientError> {
        if !self.under_path(&page, LOGIN_PATH) {
            info!("no login required");
            return Ok((false, page));
        }
        info!(username = %self.credentials.username, "login required");
        let destination = page.query_param("return_to");
        let hidden = page_hidden_fields(&page.body, &self.config.selectors)?;
        drop(page);

        let mut form = vec![
            ("login".to_string(), self.credentials.username.clone()),
            ("password".to_string(), self.credentials.password.clone()),
        ];
        form.extend(hidden);
        let page = self
            .transport
            .post(&self.url(SESSION_PATH), RequestOptions::form(form))
            .await?;

        if self.on_path(&page, SESSION_PATH) || self.under_path(&page, LOGIN_PATH) {
            return Err(match flash_banner(&page.body, &self.config.selectors)? {
                Some(message) => ClientError::login(message),
                None => ClientError::unexpected_content(
                    "ended up back on login page but not sure why",
                ),
            });
        }
        let two_factor_app = self.url(TWO_FACTOR_APP_PATH);
        if self.under_path(&page, &format!("{TWO_FACTOR_PREFIX}/"))
            && page.url.as_str() != two_factor_app
        {
            return Err(ClientError::UnsupportedTwoFactorMethod {
                url: page.url.to_string(),
            });
        }
        if let Some(destination) = destination {
            let actual = page.url.as_str();
            if actual != destination && actual != two_factor_app {
                return Err(ClientError::unexpected_page(actual, destination));
            }
        }
        info!("login performed");
        Ok((true, page))
    }

    #[instrument(level = "debug", skip_all, fields(url = %page.url))]
    pub(crate) async fn handle_two_factor(&self, page: Page) -> Result<(bool, Page), ClientError> {
        if !self.under_path(&page, TWO_FACTOR_APP_PATH) {
            info!("no two-factor authentication required");
            return Ok((false, page));
        }
        info!("two-factor authentication required");
        let hidden = page_hidden_fields(&page.body, &self.config.selectors)?;
        drop(page);

        let otp = self
            .otp_provider
            .otp_for_user(&self.credentials.username)
            .await?;
        let mut form = vec![("app_otp".to_string(), otp)];
        form.extend(hidden);
        let page = self
            .transport
            .post(&self.url(TWO_FACTOR_PREFIX), RequestOptions::form(form))
            .await?;

        if self.under_path(&page, TWO_FACTOR_PREFIX) {
            return Err(match flash_banner(&page.body, &self.config.selectors)? {
                Some(message) => ClientError::TwoFactorAuthentication(message),
                None => ClientError::unexpected_content(
                    "ended up back on two-factor authentication page but not sure why",
                ),
            });
        }
        info!("two-factor authentication performed");
        Ok((true, page))
    }

    #[instrument(level = "debug", skip_all, fields(url = %page.url))]
    pub(crate) async fn handle_password_confirmation(
        &self,
        page: Page,
    ) -> Result<(bool, Page), ClientError> {
        if !is_password_confirmation_page(&page.body, &self.config.selectors)? {
            info!("no password confirmation required");
            return Ok((false, page));
        }
        info!("password confirmation required");
        let confirmation = select_password_confirmation_form(&page.body, &self.config.selectors)?;
        let referer = page.url.to_string();
        drop(page);

        let target_url = confirmation.target_url(&self.config.base_url);
        let form = confirmation_form_fields(&self.credentials.password, confirmation.hidden_fields);
        let page = self
            .transport
            .post(
                &target_url,
                RequestOptions::form(form).with_referer(referer),
            )
            .await?;

        if self.under_path(&page, PASSWORD_CONFIRMATION_PREFIX) {
            return Err(match flash_banner(&page.body, &self.config.selectors)? {
                Some(message) => ClientError::login(message),
                None => ClientError::unexpected_content(
                    "ended up back on password confirmation page but not sure why",
                ),
            });
        }
        info!("password confirmation performed");
        Ok((true, page))
    }
}

fn confirmation_form_fields(password: &str, hidden: HiddenFields) -> Vec<(String, String)> {
    let mut form = vec![("sudo_password".to_string(), password.to_string())];
    form.extend(hidden);
    form
}
