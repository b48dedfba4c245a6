//! Token operations.
//!
//! Public methods take the operation guard; the `fetch_*` helpers assume it is
//! held and may call each other freely.

use futures_util::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info, instrument};

use super::Session;
use crate::dates;
use crate::error::{ClientError, TokenRef};
use crate::pages::{self, ListedToken};
use crate::permissions::{PermissionKey, PossiblePermissions};
use crate::token::{
    BulkTokenInfo, CompleteTokenInfo, Expiration, IndividualTokenInfo, NewToken,
    StandardTokenInfo, TokenScope,
};
use crate::transport::{RequestOptions, TransportError};

pub(crate) const TOKEN_LIST_PATH: &str = "/settings/tokens?type=beta";
pub(crate) const TOKENS_PATH: &str = "/settings/personal-access-tokens";
pub(crate) const NEW_TOKEN_PATH: &str = "/settings/personal-access-tokens/new";
pub(crate) const SUGGESTIONS_PATH: &str = "/settings/personal-access-tokens/suggestions";

fn token_path(id: u64) -> String {
    format!("{TOKENS_PATH}/{id}")
}

impl Session {
    /// Lists tokens with the information shown on the token list page.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] for transport, interception, and parse failures.
    pub async fn tokens_bulk(&self) -> Result<Vec<BulkTokenInfo>, ClientError> {
        self.guarded(async {
            let listed = self.fetch_token_list().await?;
            Ok(listed.into_iter().map(|token| token.info).collect())
        })
        .await
    }

    /// Lists tokens with their expiration dates.
    ///
    /// Expirations are fetched concurrently, bounded by
    /// [`SessionConfig::expiration_concurrency`](crate::SessionConfig), and
    /// returned in list-page order.
    ///
    /// # Errors
    ///
    /// Returns the first failure; no partial list is returned.
    pub async fn tokens(&self) -> Result<Vec<StandardTokenInfo>, ClientError> {
        self.guarded(self.fetch_tokens_with_expiration()).await
    }

    /// Expiration of one token.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the fragment cannot be fetched or parsed.
    pub async fn token_expiration(&self, id: u64) -> Result<Expiration, ClientError> {
        self.guarded(self.fetch_expiration(id)).await
    }

    /// Detail-page information for a token id.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenNotFound`] when the site has no such token.
    pub async fn token_info_by_id(&self, id: u64) -> Result<IndividualTokenInfo, ClientError> {
        self.guarded(self.fetch_token_info(id)).await
    }

    /// Detail-page information for a token name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenNotFound`] when no listed token has the name.
    pub async fn token_info_by_name(&self, name: &str) -> Result<IndividualTokenInfo, ClientError> {
        self.guarded(async {
            let listed = self.find_listed_by_name(name).await?;
            self.fetch_token_info(listed.info.id).await
        })
        .await
    }

    /// Everything known about a token id, including last use.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenNotFound`] when the id is not listed.
    pub async fn complete_token_info_by_id(
        &self,
        id: u64,
    ) -> Result<CompleteTokenInfo, ClientError> {
        self.guarded(async {
            let listed = self.find_listed(&TokenRef::Id(id)).await?;
            self.fetch_complete_info(listed).await
        })
        .await
    }

    /// Everything known about a token name, including last use.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenNotFound`] when no listed token has the name.
    pub async fn complete_token_info_by_name(
        &self,
        name: &str,
    ) -> Result<CompleteTokenInfo, ClientError> {
        self.guarded(async {
            let listed = self.find_listed_by_name(name).await?;
            self.fetch_complete_info(listed).await
        })
        .await
    }

    /// Creates a token and returns its secret value.
    ///
    /// Repository names in [`TokenScope::SelectRepositories`] are resolved to
    /// ids before anything is submitted.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::RepositoryNotFound`] for an unknown repository,
    /// [`ClientError::TokenNameAlreadyTaken`] or [`ClientError::TokenCreation`]
    /// when the site rejects the token.
    pub async fn create_token(&self, token: &NewToken) -> Result<String, ClientError> {
        self.guarded(self.fetch_created_token(token)).await
    }

    /// Deletes a token by id.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenNotFound`] when the id is not listed.
    pub async fn delete_token_by_id(&self, id: u64) -> Result<(), ClientError> {
        self.guarded(async {
            let listed = self.find_listed(&TokenRef::Id(id)).await?;
            self.submit_deletion(&listed).await
        })
        .await
    }

    /// Deletes a token by name.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::TokenNotFound`] when no listed token has the name.
    pub async fn delete_token_by_name(&self, name: &str) -> Result<(), ClientError> {
        self.guarded(async {
            let listed = self.find_listed_by_name(name).await?;
            self.submit_deletion(&listed).await
        })
        .await
    }

    /// Permissions the token creation form currently offers.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] for transport, interception, and parse failures.
    pub async fn possible_permissions(&self) -> Result<PossiblePermissions, ClientError> {
        self.guarded(async {
            let credentials = self.credentials();
            let outcome = self
                .interceptor(&credentials)
                .get(NEW_TOKEN_PATH, RequestOptions::new())
                .await?;
            pages::parse_possible_permissions(&outcome.page.body, &self.config.selectors)
        })
        .await
    }

    #[instrument(level = "debug", skip_all)]
    async fn fetch_token_list(&self) -> Result<Vec<ListedToken>, ClientError> {
        let credentials = self.credentials();
        let outcome = self
            .interceptor(&credentials)
            .get(TOKEN_LIST_PATH, RequestOptions::new())
            .await?;
        let listed = pages::parse_token_list(&outcome.page.body, &self.config.selectors)?;
        debug!(count = listed.len(), "token list parsed");
        Ok(listed)
    }

    async fn fetch_tokens_with_expiration(&self) -> Result<Vec<StandardTokenInfo>, ClientError> {
        let listed = self.fetch_token_list().await?;
        stream::iter(listed)
            .map(|token| async move {
                let expires = self.fetch_expiration(token.info.id).await?;
                Ok::<_, ClientError>(StandardTokenInfo::from_bulk(token.info, expires))
            })
            .buffered(self.config.expiration_concurrency.max(1))
            .try_collect()
            .await
    }

    /// The expiration fragment needs a logged-in session but never triggers
    /// interception, so it bypasses the interceptor.
    #[instrument(level = "debug", skip(self))]
    async fn fetch_expiration(&self, id: u64) -> Result<Expiration, ClientError> {
        let url = self.config.url(&format!("{}/expiration", token_path(id)));
        let page = self
            .transport
            .get(&url, RequestOptions::new().with_query("page", "1"))
            .await?;
        pages::parse_expiration(&page.body, dates::today())
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch_token_info(&self, id: u64) -> Result<IndividualTokenInfo, ClientError> {
        let credentials = self.credentials();
        let outcome = self
            .interceptor(&credentials)
            .get(&token_path(id), RequestOptions::new())
            .await
            .map_err(|error| not_found_as(error, TokenRef::Id(id)))?;
        let detail =
            pages::parse_token_detail(&outcome.page.body, &self.config.selectors, dates::today())?;
        let expires = self.fetch_expiration(id).await?;
        Ok(IndividualTokenInfo {
            id,
            name: detail.name,
            created: detail.created,
            expires,
            permissions: detail.permissions,
        })
    }

    async fn fetch_complete_info(
        &self,
        listed: ListedToken,
    ) -> Result<CompleteTokenInfo, ClientError> {
        let individual = self.fetch_token_info(listed.info.id).await?;
        Ok(CompleteTokenInfo::combine(individual, listed.info))
    }

    async fn find_listed_by_name(&self, name: &str) -> Result<ListedToken, ClientError> {
        self.find_listed(&TokenRef::Name(name.to_string())).await
    }

    async fn find_listed(&self, token_ref: &TokenRef) -> Result<ListedToken, ClientError> {
        self.fetch_token_list()
            .await?
            .into_iter()
            .find(|token| match token_ref {
                TokenRef::Id(id) => token.info.id == *id,
                TokenRef::Name(name) => token.info.name == *name,
            })
            .ok_or_else(|| ClientError::TokenNotFound(token_ref.clone()))
    }

    #[instrument(level = "debug", skip_all, fields(name = %token.name))]
    async fn fetch_created_token(&self, token: &NewToken) -> Result<String, ClientError> {
        let credentials = self.credentials();
        let interceptor = self.interceptor(&credentials);
        let form_page = interceptor
            .get(NEW_TOKEN_PATH, RequestOptions::new())
            .await?;
        let authenticity_token =
            pages::parse_new_token_form(&form_page.page.body, &self.config.selectors)?;

        let owner = token
            .resource_owner
            .clone()
            .unwrap_or_else(|| credentials.username.clone());
        let mut repository_ids = Vec::new();
        if let TokenScope::SelectRepositories(names) = &token.scope {
            for name in names {
                repository_ids.push(self.resolve_repository_id(&owner, name).await?);
            }
        }

        let form = creation_form(token, &owner, authenticity_token, &repository_ids);
        let outcome = interceptor
            .post(TOKENS_PATH, RequestOptions::form(form))
            .await?;
        let value = pages::parse_creation_result(&outcome.page.body, &self.config.selectors)?;
        info!(name = %token.name, "token created");
        Ok(value)
    }

    async fn resolve_repository_id(&self, owner: &str, name: &str) -> Result<u64, ClientError> {
        let options = RequestOptions::new()
            .with_query("target_name", owner)
            .with_query("q", name);
        let page = self
            .transport
            .get(&self.config.url(SUGGESTIONS_PATH), options)
            .await?;
        pages::parse_repository_suggestions(&page.body, &self.config.selectors, name)?.ok_or_else(
            || ClientError::RepositoryNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            },
        )
    }

    #[instrument(level = "debug", skip_all, fields(id = listed.info.id))]
    async fn submit_deletion(&self, listed: &ListedToken) -> Result<(), ClientError> {
        let credentials = self.credentials();
        let form = vec![
            ("_method".to_string(), "delete".to_string()),
            ("authenticity_token".to_string(), listed.deletion_token.clone()),
        ];
        let options = RequestOptions::form(form).with_referer(self.config.url(TOKEN_LIST_PATH));
        let outcome = self
            .interceptor(&credentials)
            .post(&token_path(listed.info.id), options)
            .await?;
        pages::parse_deletion_result(&outcome.page.body, &self.config.selectors)?;
        info!(name = %listed.info.name, "token deleted");
        Ok(())
    }
}

fn not_found_as(error: ClientError, token_ref: TokenRef) -> ClientError {
    match error {
        ClientError::Transport(TransportError::HttpStatus { status: 404, .. }) => {
            ClientError::TokenNotFound(token_ref)
        }
        other => other,
    }
}

/// Form fields for the token creation POST. Every known permission is sent;
/// ungranted ones carry an empty value.
fn creation_form(
    token: &NewToken,
    owner: &str,
    authenticity_token: String,
    repository_ids: &[u64],
) -> Vec<(String, String)> {
    let mut form = vec![
        ("authenticity_token".to_string(), authenticity_token),
        ("user_programmatic_access[name]".to_string(), token.name.clone()),
        (
            "user_programmatic_access[default_expires_at]".to_string(),
            "custom".to_string(),
        ),
        (
            "user_programmatic_access[custom_expires_at]".to_string(),
            token.expires.format("%Y-%m-%d").to_string(),
        ),
        (
            "user_programmatic_access[description]".to_string(),
            token.description.clone(),
        ),
        ("target_name".to_string(), owner.to_string()),
        ("install_target".to_string(), token.scope.install_target().to_string()),
    ];
    form.extend(
        repository_ids
            .iter()
            .map(|id| ("repository_ids[]".to_string(), id.to_string())),
    );
    form.extend(PermissionKey::all().into_iter().map(|key| {
        let value = token
            .permissions
            .get(&key)
            .copied()
            .unwrap_or_default()
            .form_value();
        (key.form_field(), value.to_string())
    }));
    form
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::permissions::{AccountPermission, PermissionValue, RepositoryPermission};
    use chrono::NaiveDate;

    fn value<'a>(form: &'a [(String, String)], name: &str) -> Vec<&'a str> {
        form.iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    #[test]
    fn test_creation_form_without_permissions_sends_every_key_empty() {
        let token = NewToken::new("ci", NaiveDate::from_ymd_opt(2023, 2, 5).unwrap());
        let form = creation_form(&token, "octocat", "tok".into(), &[]);
        assert_eq!(value(&form, "user_programmatic_access[custom_expires_at]"), ["2023-02-05"]);
        assert_eq!(value(&form, "install_target"), ["none"]);
        assert_eq!(value(&form, "target_name"), ["octocat"]);
        let permission_fields: Vec<_> = form
            .iter()
            .filter(|(key, _)| key.starts_with("integration[default_permissions]"))
            .collect();
        assert_eq!(permission_fields.len(), PermissionKey::all().len());
        assert!(permission_fields.iter().all(|(_, value)| value.is_empty()));
    }

    #[test]
    fn test_creation_form_selected_repositories_and_grants() {
        let token = NewToken::new("ci", NaiveDate::from_ymd_opt(2023, 2, 5).unwrap())
            .with_scope(TokenScope::SelectRepositories(vec!["a".into(), "b".into()]))
            .with_permission(
                PermissionKey::Repository(RepositoryPermission::Contents),
                PermissionValue::Write,
            )
            .with_permission(
                PermissionKey::Account(AccountPermission::Followers),
                PermissionValue::Read,
            );
        let form = creation_form(&token, "octocat", "tok".into(), &[11, 22]);
        assert_eq!(value(&form, "repository_ids[]"), ["11", "22"]);
        assert_eq!(value(&form, "install_target"), ["selected"]);
        assert_eq!(value(&form, "integration[default_permissions][contents]"), ["write"]);
        assert_eq!(value(&form, "integration[default_permissions][followers]"), ["read"]);
        assert_eq!(value(&form, "integration[default_permissions][issues]"), [""]);
    }

    #[test]
    fn test_only_http_404_maps_to_not_found() {
        let missing = ClientError::Transport(TransportError::HttpStatus {
            url: "u".into(),
            status: 404,
        });
        assert!(matches!(
            not_found_as(missing, TokenRef::Id(7)),
            ClientError::TokenNotFound(TokenRef::Id(7))
        ));
        let server = ClientError::Transport(TransportError::HttpStatus {
            url: "u".into(),
            status: 500,
        });
        assert!(matches!(not_found_as(server, TokenRef::Id(7)), ClientError::Transport(_)));
    }
}
