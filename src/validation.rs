use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::LazyLock;

use crate::errors::AppError;

static ID_CARD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{13}$").expect("id card pattern is valid"));

/// Validates and normalizes a Thai phone number.
///
/// Uses phonenumber library (port of Google's libphonenumber) to:
/// - Parse numbers written with or without the +66 country code
/// - Check the number against Thai numbering rules
/// - Normalize to national digits (0812345678)
///
/// # Returns
///
/// * `(bool, String)` - validity flag and either the normalized number or a reason.
pub fn validate_th_phone(raw: &str) -> (bool, String) {
    if raw.trim().is_empty() || raw.len() < 8 {
        return (false, "Phone too short".to_string());
    }

    match phonenumber::parse(Some(CountryId::TH), raw) {
        Ok(number) => {
            if phonenumber::is_valid(&number) {
                let national: String = number
                    .format()
                    .mode(Mode::National)
                    .to_string()
                    .chars()
                    .filter(|c| c.is_ascii_digit())
                    .collect();
                tracing::debug!("Valid TH phone: {} -> {}", raw, national);
                (true, national)
            } else {
                tracing::warn!("Invalid TH phone number: {}", raw);
                (false, "Invalid Thai phone number".to_string())
            }
        }
        Err(e) => {
            tracing::warn!("Failed to parse TH phone '{}': {:?}", raw, e);
            (false, format!("Parse error: {:?}", e))
        }
    }
}

/// Normalizes a phone number or rejects it as a bad request.
pub fn normalize_phone(raw: &str) -> Result<String, AppError> {
    match validate_th_phone(raw) {
        (true, normalized) => Ok(normalized),
        (false, reason) => Err(AppError::BadRequest(format!(
            "Invalid phone number '{}': {}",
            raw.trim(),
            reason
        ))),
    }
}

/// Strips separators from a national ID number and checks it has 13 digits.
pub fn normalize_id_card(raw: &str) -> Result<String, AppError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    if !ID_CARD_REGEX.is_match(&cleaned) {
        return Err(AppError::BadRequest(
            "id_card_number must contain exactly 13 digits".to_string(),
        ));
    }
    Ok(cleaned)
}
