//! Session configuration.
//!
//! [`SessionConfig`] carries everything a [`Session`](crate::Session) needs
//! besides credentials and the OTP provider. [`PageSelectors`] holds the CSS
//! selectors used to read the site's pages; the defaults match the current
//! markup and can be overridden when it drifts.

use std::path::{Path, PathBuf};

use scraper::Selector;

use crate::auth::CookieEncryption;
use crate::error::ClientError;
use crate::transport::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS};

/// Default site base URL.
pub const DEFAULT_BASE_URL: &str = "https://github.com";
/// Default number of concurrent expiration requests when listing tokens.
pub const DEFAULT_EXPIRATION_CONCURRENCY: usize = 8;

/// CSS selectors for every element read from the site's pages.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct PageSelectors {
    pub flash_banner: String,
    pub password_confirmation_heading: String,
    pub hidden_inputs: String,
    pub authenticity_token: String,
    pub new_token_form_id: String,
    pub token_list: String,
    pub token_list_item: String,
    pub token_last_used: String,
    pub token_link: String,
    pub token_name: String,
    pub token_created: String,
    pub token_checked_permissions: String,
    pub new_token_value: String,
    pub token_creation_error: String,
    pub deletion_alert: String,
    pub suggestion_item: String,
    pub suggestion_name: String,
    pub repository_permission_items: String,
    pub account_permission_items: String,
    pub permission_name: String,
    pub permission_description: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            flash_banner: "#js-flash-container".into(),
            password_confirmation_heading: "#sudo > div > h1".into(),
            hidden_inputs: r#"form input[type="hidden"]"#.into(),
            authenticity_token: r#"input[name="authenticity_token"]"#.into(),
            new_token_form_id: "new_user_programmatic_access".into(),
            token_list: ".listgroup".into(),
            token_list_item: ".listgroup > .access-token > .listgroup-item".into(),
            token_last_used: ".last-used".into(),
            token_link: ".token-description > strong a".into(),
            token_name: "h2 > p".into(),
            token_created: "div.clearfix.mb-1 p.float-left".into(),
            // `:checked` is not supported by the selector engine
            token_checked_permissions: r#"li input[type="radio"][checked]"#.into(),
            new_token_value: "#new-access-token".into(),
            token_creation_error: ".error, .flash-error.flash-full".into(),
            deletion_alert: r#"div[role="alert"]"#.into(),
            suggestion_item: "button".into(),
            suggestion_name: ".select-menu-item-text".into(),
            repository_permission_items: r#"[aria-label="repository-permissions"] li"#.into(),
            account_permission_items: r#"[aria-label="user-permissions"] li"#.into(),
            permission_name: "div > div > strong".into(),
            permission_description: "div.text-small".into(),
        }
    }
}

impl PageSelectors {
    /// Checks that every selector parses.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidSelector`] naming the first bad selector.
    pub fn validate(&self) -> Result<(), ClientError> {
        let all = [
            &self.flash_banner,
            &self.password_confirmation_heading,
            &self.hidden_inputs,
            &self.authenticity_token,
            &self.token_list,
            &self.token_list_item,
            &self.token_last_used,
            &self.token_link,
            &self.token_name,
            &self.token_created,
            &self.token_checked_permissions,
            &self.new_token_value,
            &self.token_creation_error,
            &self.deletion_alert,
            &self.suggestion_item,
            &self.suggestion_name,
            &self.repository_permission_items,
            &self.account_permission_items,
            &self.permission_name,
            &self.permission_description,
        ];
        for css in all {
            compile(css)?;
        }
        compile(&self.form_scoped_authenticity_token())?;
        Ok(())
    }

    /// Authenticity token selector scoped to the token creation form.
    #[must_use]
    pub fn form_scoped_authenticity_token(&self) -> String {
        scoped_to_form(&self.authenticity_token, &self.new_token_form_id)
    }
}

pub(crate) fn scoped_to_form(selector: &str, form_id: &str) -> String {
    format!(r#"form[id="{form_id}"] {selector}"#)
}

/// Compiles a CSS selector.
pub(crate) fn compile(css: &str) -> Result<Selector, ClientError> {
    Selector::parse(css).map_err(|e| ClientError::InvalidSelector(format!("{css}: {e}")))
}

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Site base URL, without trailing slash.
    pub base_url: String,
    /// Directory holding the persisted cookie jar; `None` disables persistence.
    pub persist_dir: Option<PathBuf>,
    /// Protection of the persisted jar.
    pub cookie_encryption: CookieEncryption,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub read_timeout_secs: u64,
    /// Maximum concurrent expiration requests when listing tokens.
    pub expiration_concurrency: usize,
    /// Page selectors.
    pub selectors: PageSelectors,
    /// Subscriber every session operation logs to. `None` uses the ambient
    /// default subscriber.
    pub log_dispatch: Option<tracing::Dispatch>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            persist_dir: None,
            cookie_encryption: CookieEncryption::default(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            expiration_concurrency: DEFAULT_EXPIRATION_CONCURRENCY,
            selectors: PageSelectors::default(),
            log_dispatch: None,
        }
    }
}

impl SessionConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL. A trailing slash is dropped.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Enables cookie persistence in `dir`.
    #[must_use]
    pub fn with_persist_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.persist_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Sets how the persisted jar is protected.
    #[must_use]
    pub fn with_cookie_encryption(mut self, encryption: CookieEncryption) -> Self {
        self.cookie_encryption = encryption;
        self
    }

    /// Sets connect and whole-request timeouts in seconds.
    #[must_use]
    pub fn with_timeouts(mut self, connect_secs: u64, read_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.read_timeout_secs = read_secs;
        self
    }

    /// Sets the expiration fan-out limit. Zero is treated as one.
    #[must_use]
    pub fn with_expiration_concurrency(mut self, limit: usize) -> Self {
        self.expiration_concurrency = limit.max(1);
        self
    }

    /// Overrides page selectors.
    #[must_use]
    pub fn with_selectors(mut self, selectors: PageSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Routes the session's log events to `dispatch`.
    #[must_use]
    pub fn with_log_dispatch(mut self, dispatch: tracing::Dispatch) -> Self {
        self.log_dispatch = Some(dispatch);
        self
    }

    /// Absolute URL for a site path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}
