//! Form and document extraction helpers.
//!
//! Parsed documents never leave this module or [`crate::pages`]: callers hand
//! in page bodies and get owned values back, so nothing tied to the DOM is held
//! across an await point.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};

use crate::config::{PageSelectors, compile, scoped_to_form};
use crate::error::ClientError;

/// Hidden form fields by name.
pub type HiddenFields = BTreeMap<String, String>;

#[allow(clippy::expect_used)]
static NOSCRIPT_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<noscript\b[^>]*>(.*?)</noscript>").expect("noscript regex is valid")
});

/// Whitespace-trimmed text content of an element.
#[must_use]
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// The single element matching `css` under `root`.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] for zero or several matches.
pub fn expect_exactly_one<'a>(
    root: ElementRef<'a>,
    css: &str,
) -> Result<ElementRef<'a>, ClientError> {
    let selector = compile(css)?;
    let mut matches = root.select(&selector);
    let first = matches
        .next()
        .ok_or_else(|| ClientError::unexpected_content(format!("no element matches {css:?}")))?;
    if matches.next().is_some() {
        return Err(ClientError::unexpected_content(format!(
            "more than one element matches {css:?}"
        )));
    }
    Ok(first)
}

/// The element matching `css` under `root`, if any.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] when several elements match.
pub fn one_or_none<'a>(
    root: ElementRef<'a>,
    css: &str,
) -> Result<Option<ElementRef<'a>>, ClientError> {
    let selector = compile(css)?;
    let mut matches = root.select(&selector);
    let first = matches.next();
    if first.is_some() && matches.next().is_some() {
        return Err(ClientError::unexpected_content(format!(
            "more than one element matches {css:?}"
        )));
    }
    Ok(first)
}

/// The anti-forgery token under `root`, optionally scoped to the form with id
/// `form_id`.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] when no single token is present.
pub fn extract_authenticity_token(
    root: ElementRef<'_>,
    selectors: &PageSelectors,
    form_id: Option<&str>,
) -> Result<String, ClientError> {
    let css = match form_id {
        Some(form_id) => scoped_to_form(&selectors.authenticity_token, form_id),
        None => selectors.authenticity_token.clone(),
    };
    one_or_none(root, &css)?
        .and_then(|input| input.value().attr("value"))
        .map(str::to_string)
        .ok_or_else(|| ClientError::unexpected_content("no authenticity token found on page"))
}

/// All hidden inputs under `root` that carry a value.
///
/// # Errors
///
/// Returns [`ClientError::InvalidSelector`] if the configured selector is bad.
pub fn extract_hidden_fields(
    root: ElementRef<'_>,
    selectors: &PageSelectors,
) -> Result<HiddenFields, ClientError> {
    let selector = compile(&selectors.hidden_inputs)?;
    Ok(root
        .select(&selector)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value")?;
            Some((name.to_string(), value.to_string()))
        })
        .collect())
}

/// Hidden fields of a whole page.
///
/// # Errors
///
/// Returns [`ClientError::InvalidSelector`] if the configured selector is bad.
pub fn page_hidden_fields(
    body: &str,
    selectors: &PageSelectors,
) -> Result<HiddenFields, ClientError> {
    let document = Html::parse_document(body);
    extract_hidden_fields(document.root_element(), selectors)
}

/// Text of the flash/error banner, if the page shows one.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] for several banners.
pub fn flash_banner(body: &str, selectors: &PageSelectors) -> Result<Option<String>, ClientError> {
    let document = Html::parse_document(body);
    Ok(one_or_none(document.root_element(), &selectors.flash_banner)?.map(element_text))
}

/// Whether the page is a password confirmation challenge.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] for several headings.
pub fn is_password_confirmation_page(
    body: &str,
    selectors: &PageSelectors,
) -> Result<bool, ClientError> {
    let document = Html::parse_document(body);
    Ok(one_or_none(document.root_element(), &selectors.password_confirmation_heading)?.is_some())
}

/// The form to submit the password to on a confirmation page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationForm {
    /// Raw `action` attribute.
    pub action: String,
    /// Hidden fields to submit along with the password.
    pub hidden_fields: HiddenFields,
}

impl ConfirmationForm {
    /// Submission URL: absolute actions pass through, relative ones are
    /// appended to `base_url`.
    #[must_use]
    pub fn target_url(&self, base_url: &str) -> String {
        if self.action.starts_with("https://") || self.action.starts_with("http://") {
            self.action.clone()
        } else {
            format!("{}{}", base_url.trim_end_matches('/'), self.action)
        }
    }
}

/// Picks the password form on a confirmation page.
///
/// Forms rendered inside `<noscript>` count toward the total. A page with a
/// single form in total uses that form. With several, the password form is the
/// only one rendered inside `<noscript>`. With scripting enabled the HTML
/// parser keeps `<noscript>` content as raw text, so those bodies are parsed
/// separately.
///
/// # Errors
///
/// Returns [`ClientError::UnexpectedContent`] when no form, or no single
/// password form, is found.
pub fn select_password_confirmation_form(
    body: &str,
    selectors: &PageSelectors,
) -> Result<ConfirmationForm, ClientError> {
    let document = Html::parse_document(body);
    let root = document.root_element();
    let mut hidden_fields = extract_hidden_fields(root, selectors)?;
    let form_selector = compile("form")?;
    let visible: Vec<ElementRef<'_>> = root
        .select(&form_selector)
        .filter(|form| !inside_noscript(*form))
        .collect();
    let mut hidden = noscript_forms(body)?;

    let action = match (visible.as_slice(), hidden.len()) {
        ([], 0) => return Err(ClientError::unexpected_content("no form found on page")),
        ([form], 0) => form_action(*form)?,
        (_, 1) => {
            let (action, fields) = hidden.remove(0);
            hidden_fields.extend(fields);
            action
        }
        (_, 0) => {
            return Err(ClientError::unexpected_content(
                "no noscript password form found on confirmation page",
            ));
        }
        (_, n) => {
            return Err(ClientError::unexpected_content(format!(
                "{n} noscript forms found on confirmation page, expected one"
            )));
        }
    };
    Ok(ConfirmationForm {
        action,
        hidden_fields,
    })
}

fn inside_noscript(form: ElementRef<'_>) -> bool {
    form.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| ancestor.value().name() == "noscript")
}

fn noscript_forms(body: &str) -> Result<Vec<(String, HiddenFields)>, ClientError> {
    let form_selector = compile("form")?;
    let hidden_selector = compile(r#"input[type="hidden"]"#)?;
    let mut found = Vec::new();
    for capture in NOSCRIPT_BODY.captures_iter(body) {
        let Some(inner) = capture.get(1) else {
            continue;
        };
        let fragment = Html::parse_fragment(inner.as_str());
        for form in fragment.root_element().select(&form_selector) {
            let fields: HiddenFields = form
                .select(&hidden_selector)
                .filter_map(|input| {
                    Some((
                        input.value().attr("name")?.to_string(),
                        input.value().attr("value")?.to_string(),
                    ))
                })
                .collect();
            found.push((form_action(form)?, fields));
        }
    }
    Ok(found)
}

fn form_action(form: ElementRef<'_>) -> Result<String, ClientError> {
    form.value()
        .attr("action")
        .map(str::to_string)
        .ok_or_else(|| ClientError::unexpected_content("confirmation form has no action"))
}
