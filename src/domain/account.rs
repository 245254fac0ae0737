use crate::error::ScreeningError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An ISO 3166 country code (alpha-2 or alpha-3), normalised to uppercase.
///
/// Policies compare country codes as allow-lists, so the normalisation applies
/// to both sides of the comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    pub fn new(code: &str) -> Result<Self, ScreeningError> {
        let normalised = code.trim().to_ascii_uppercase();
        let valid_len = (2..=3).contains(&normalised.len());
        if valid_len && normalised.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(Self(normalised))
        } else {
            Err(ScreeningError::ValidationError(format!(
                "malformed country code '{}'",
                code
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CountryCode {
    type Err = ScreeningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CountryCode {
    type Error = ScreeningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<CountryCode> for String {
    fn from(code: CountryCode) -> Self {
        code.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One side of a payment: the account the funds leave or arrive at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(alias = "accountno", default)]
    pub account_no: String,
    #[serde(alias = "sortcode", default)]
    pub sort_code: String,
    #[serde(alias = "countrycode")]
    pub country_code: CountryCode,
}
