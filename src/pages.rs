//! Extraction of results from the token settings pages.
//!
//! Each function takes a page body and returns owned values; selectors come
//! from [`PageSelectors`].

use chrono::NaiveDate;
use scraper::Html;
use tracing::warn;

use crate::config::{PageSelectors, compile};
use crate::dates::parse_display_date;
use crate::error::ClientError;
use crate::html::{element_text, expect_exactly_one, extract_authenticity_token, one_or_none};
use crate::permissions::{
    PermissionKey, PermissionValue, Permissions, PossiblePermission, PossiblePermissions,
};
use crate::token::{BulkTokenInfo, Expiration};

/// Text the site shows after a successful deletion.
pub const DELETION_SUCCESS_TEXT: &str = "Deleted personal access token";

/// A token list entry plus the per-entry secret needed to delete it.
///
/// The secret is only valid for the list snapshot it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedToken {
    /// Public summary.
    pub info: BulkTokenInfo,
    /// Authenticity token of the entry's delete form.
    pub deletion_token: String,
}

/// Fields read from a token's detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDetail {
    /// Token name.
    pub name: String,
    /// Creation date.
    pub created: NaiveDate,
    /// Checked permissions.
    pub permissions: Permissions,
}

/// Parses the token list page.
///
/// A missing list container is an error; an empty one is zero tokens.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] when the container or an entry's
/// fields are missing.
pub fn parse_token_list(
    body: &str,
    selectors: &PageSelectors,
) -> Result<Vec<ListedToken>, ClientError> {
    let document = Html::parse_document(body);
    let root = document.root_element();
    if one_or_none(root, &selectors.token_list)?.is_none() {
        return Err(ClientError::unexpected_content("no token list found on page"));
    }
    let item_selector = compile(&selectors.token_list_item)?;
    root.select(&item_selector)
        .map(|item| {
            let last_used = element_text(expect_exactly_one(item, &selectors.token_last_used)?);
            let link = expect_exactly_one(item, &selectors.token_link)?;
            let href = link
                .value()
                .attr("href")
                .ok_or_else(|| ClientError::unexpected_content("token link has no href"))?;
            let id = token_id_from_href(href)?;
            let deletion_token = extract_authenticity_token(item, selectors, None)?;
            Ok(ListedToken {
                info: BulkTokenInfo {
                    id,
                    name: element_text(link),
                    last_used,
                },
                deletion_token,
            })
        })
        .collect()
}

fn token_id_from_href(href: &str) -> Result<u64, ClientError> {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
        .ok_or_else(|| ClientError::unexpected_content(format!("no token id in link {href:?}")))
}

/// Parses the expiration fragment.
///
/// "Expires on DATE" and "Expired on DATE" yield the date. Otherwise, text that
/// is not a date but mentions "expired" yields [`Expiration::Expired`]. After
/// an "Expired on" prefix the remainder must be a date.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] for any other text.
pub fn parse_expiration(body: &str, today: NaiveDate) -> Result<Expiration, ClientError> {
    let document = Html::parse_document(body);
    let text = document
        .root_element()
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let date_text = ["expires on ", "expired on "]
        .iter()
        .find(|prefix| {
            text.get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
        .and_then(|prefix| text.get(prefix.len()..))
        .unwrap_or(&text);
    if let Ok(date) = parse_display_date(date_text, today) {
        return Ok(Expiration::On(date));
    }
    if date_text.contains("expired") {
        return Ok(Expiration::Expired);
    }
    Err(ClientError::unexpected_content(format!(
        "could not parse expiration date {date_text:?}"
    )))
}

/// Parses a token's detail page.
///
/// The creation line reads either "Created on DATE" or "Created today".
/// Checked permissions with unknown identifiers are skipped with a warning.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] when name, creation date, or
/// permissions are missing or malformed.
pub fn parse_token_detail(
    body: &str,
    selectors: &PageSelectors,
    today: NaiveDate,
) -> Result<TokenDetail, ClientError> {
    let document = Html::parse_document(body);
    let root = document.root_element();
    let name = element_text(expect_exactly_one(root, &selectors.token_name)?);

    let created_text = element_text(expect_exactly_one(root, &selectors.token_created)?);
    let created_date_text = created_text
        .strip_prefix("Created ")
        .map(|rest| rest.strip_prefix("on ").unwrap_or(rest))
        .ok_or_else(|| {
            ClientError::unexpected_content(format!("unexpected creation text {created_text:?}"))
        })?;
    let created = parse_display_date(created_date_text, today).map_err(|_| {
        ClientError::unexpected_content(format!(
            "could not parse creation date {created_date_text:?}"
        ))
    })?;

    let mut permissions = Permissions::new();
    let radio_selector = compile(&selectors.token_checked_permissions)?;
    for radio in root.select(&radio_selector) {
        let Some(field) = radio.value().attr("name") else {
            continue;
        };
        let identifier = field_identifier(field);
        let Some(key) = PermissionKey::from_identifier(identifier) else {
            warn!(
                identifier = %identifier,
                "unknown permission; skipping (a newer version may know it)"
            );
            continue;
        };
        let raw_value = radio.value().attr("value").unwrap_or_default();
        let value = PermissionValue::from_form_value(raw_value).ok_or_else(|| {
            ClientError::unexpected_content(format!(
                "unknown value {raw_value:?} for permission {identifier}"
            ))
        })?;
        permissions.insert(key, value);
    }
    if permissions.is_empty() {
        return Err(ClientError::unexpected_content("no permission inputs found for token"));
    }

    Ok(TokenDetail {
        name,
        created,
        permissions,
    })
}

/// `integration[default_permissions][contents]` -> `contents`
fn field_identifier(field: &str) -> &str {
    field
        .rsplit('[')
        .next()
        .unwrap_or(field)
        .trim_end_matches(']')
}

/// Authenticity token of the token creation form.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] if the form or token is missing.
pub fn parse_new_token_form(body: &str, selectors: &PageSelectors) -> Result<String, ClientError> {
    let document = Html::parse_document(body);
    extract_authenticity_token(
        document.root_element(),
        selectors,
        Some(&selectors.new_token_form_id),
    )
}

/// Reads the new token's value from the page shown after creation.
///
/// # Errors
///
/// Returns [`ClientError::TokenNameAlreadyTaken`] or
/// [`ClientError::TokenCreation`] when the page shows an error, and
/// [`ClientError::UnexpectedContent`] when it shows neither value nor error.
pub fn parse_creation_result(body: &str, selectors: &PageSelectors) -> Result<String, ClientError> {
    let document = Html::parse_document(body);
    let root = document.root_element();
    if let Some(token) = one_or_none(root, &selectors.new_token_value)? {
        let value = token
            .value()
            .attr("value")
            .map_or_else(|| element_text(token), str::to_string);
        if value.is_empty() {
            return Err(ClientError::unexpected_content("new token value is empty"));
        }
        return Ok(value);
    }
    match one_or_none(root, &selectors.token_creation_error)? {
        Some(error) => {
            let message = element_text(error);
            if message.to_lowercase().contains("name has already been taken") {
                Err(ClientError::TokenNameAlreadyTaken(message))
            } else {
                Err(ClientError::TokenCreation(message))
            }
        }
        None => Err(ClientError::unexpected_content("no token value found on page")),
    }
}

/// Checks the alert shown after a deletion.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] unless the alert text is exactly
/// the success phrase.
pub fn parse_deletion_result(body: &str, selectors: &PageSelectors) -> Result<(), ClientError> {
    let document = Html::parse_document(body);
    let selector = compile(&selectors.deletion_alert)?;
    let alert = document
        .root_element()
        .select(&selector)
        .next()
        .ok_or_else(|| ClientError::unexpected_content("deletion result not found on page"))?;
    let text = element_text(alert);
    if text == DELETION_SUCCESS_TEXT {
        Ok(())
    } else {
        Err(ClientError::unexpected_content(format!("deletion failed: {text:?}")))
    }
}

/// Id of the repository named exactly `repository_name` among suggestions.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] for malformed entries.
pub fn parse_repository_suggestions(
    body: &str,
    selectors: &PageSelectors,
    repository_name: &str,
) -> Result<Option<u64>, ClientError> {
    let document = Html::parse_document(body);
    let item_selector = compile(&selectors.suggestion_item)?;
    for item in document.root_element().select(&item_selector) {
        let Some(name_element) = one_or_none(item, &selectors.suggestion_name)? else {
            continue;
        };
        let text = element_text(name_element);
        let name = text.rsplit('/').next().unwrap_or(&text).trim();
        if name != repository_name {
            continue;
        }
        let input = expect_exactly_one(item, "input")?;
        let raw_id = input.value().attr("value").unwrap_or_default();
        let id = raw_id.parse().map_err(|_| {
            ClientError::unexpected_content(format!("invalid repository id {raw_id:?}"))
        })?;
        return Ok(Some(id));
    }
    Ok(None)
}

/// Permission groups declared by the token creation form.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] for malformed entries.
pub fn parse_possible_permissions(
    body: &str,
    selectors: &PageSelectors,
) -> Result<PossiblePermissions, ClientError> {
    let document = Html::parse_document(body);
    let root = document.root_element();
    let input_selector = compile("input")?;
    let mut groups = Vec::with_capacity(2);
    for items_css in [
        &selectors.repository_permission_items,
        &selectors.account_permission_items,
    ] {
        let item_selector = compile(items_css)?;
        let mut group = Vec::new();
        for item in root.select(&item_selector) {
            let name = element_text(expect_exactly_one(item, &selectors.permission_name)?);
            let description =
                element_text(expect_exactly_one(item, &selectors.permission_description)?);
            let inputs: Vec<_> = item.select(&input_selector).collect();
            let field = inputs
                .first()
                .and_then(|input| input.value().attr("name"))
                .ok_or_else(|| {
                    ClientError::unexpected_content(format!("no inputs for permission {name:?}"))
                })?;
            let allowed_values = inputs
                .iter()
                .map(|input| {
                    let raw = input.value().attr("value").unwrap_or_default();
                    PermissionValue::from_form_value(raw).ok_or_else(|| {
                        ClientError::unexpected_content(format!(
                            "unknown value {raw:?} for permission {name:?}"
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            group.push(PossiblePermission {
                identifier: field_identifier(field).to_string(),
                name,
                description,
                allowed_values,
            });
        }
        groups.push(group);
    }
    let account = groups.pop().unwrap_or_default();
    let repository = groups.pop().unwrap_or_default();
    Ok(PossiblePermissions { repository, account })
}
