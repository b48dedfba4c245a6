//! User-Agent string for requests to the token settings pages.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/fierce/ghtoken";

/// Default User-Agent for every request the session makes.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("ghtoken/{version} (fine-grained-token-client; +{PROJECT_UA_URL})")
}
