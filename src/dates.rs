//! Parsing of the human-readable dates shown on token pages.

use chrono::{Days, NaiveDate};
use thiserror::Error;

/// A date string matched none of the known formats.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not parse date {0:?}")]
pub struct DateParseError(pub String);

const FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%a, %b %d %Y",
    "%a, %b %d, %Y",
    "%a, %B %d %Y",
    "%a, %B %d, %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %b %Y",
    "%d %B %Y",
];

/// Parses a calendar date as displayed by the site, relative to `today`.
///
/// Accepts ISO dates, the abbreviated and long month forms with or without a
/// weekday, and the relative words `today`, `yesterday`, `tomorrow`.
///
/// # Errors
///
/// Returns [`DateParseError`] when no format matches.
pub fn parse_display_date(text: &str, today: NaiveDate) -> Result<NaiveDate, DateParseError> {
    let cleaned = text
        .trim()
        .trim_end_matches('.')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    match cleaned.to_ascii_lowercase().as_str() {
        "today" => return Ok(today),
        "yesterday" => {
            return today
                .checked_sub_days(Days::new(1))
                .ok_or_else(|| DateParseError(cleaned.clone()));
        }
        "tomorrow" => {
            return today
                .checked_add_days(Days::new(1))
                .ok_or_else(|| DateParseError(cleaned.clone()));
        }
        _ => {}
    }
    FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&cleaned, format).ok())
        .ok_or(DateParseError(cleaned))
}

/// Today's date in local time.
#[must_use]
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
