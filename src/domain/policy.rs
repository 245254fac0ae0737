use super::account::CountryCode;
use crate::error::ScreeningError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A tenant's compliance policy.
///
/// The country sets are allow-lists: a transaction whose country is absent
/// from the set is in breach. In the catalogue encoding they are still called
/// "country sanctions".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TenantSettingsRecord", into = "TenantSettingsRecord")]
pub struct TenantPolicy {
    pub tenant_id: String,
    pub per_transaction_limit: Decimal,
    pub daily_limit: Decimal,
    pub allowed_source_countries: BTreeSet<CountryCode>,
    pub allowed_destination_countries: BTreeSet<CountryCode>,
}

impl TenantPolicy {
    pub fn allows_source(&self, code: &CountryCode) -> bool {
        self.allowed_source_countries.contains(code)
    }

    pub fn allows_destination(&self, code: &CountryCode) -> bool {
        self.allowed_destination_countries.contains(code)
    }
}

/// The policy catalogue as stored: `{"tenantsettings": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantCatalogue {
    #[serde(rename = "tenantsettings", default)]
    pub tenant_settings: Vec<TenantPolicy>,
}

/// Catalogue encoding of a single tenant's settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSettingsRecord {
    #[serde(rename = "tenantid")]
    pub tenant_id: String,
    #[serde(rename = "velocitylimits")]
    pub velocity_limits: VelocityLimitsRecord,
    pub thresholds: ThresholdsRecord,
    #[serde(rename = "countrysanctions", default)]
    pub country_sanctions: CountrySanctionsRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VelocityLimitsRecord {
    pub daily: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsRecord {
    #[serde(rename = "pertransaction")]
    pub per_transaction: Decimal,
}

/// Comma-delimited country lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountrySanctionsRecord {
    #[serde(rename = "sourcecountrycode", default)]
    pub source_country_code: String,
    #[serde(rename = "destinationcountrycode", default)]
    pub destination_country_code: String,
}

fn parse_country_list(list: &str) -> Result<BTreeSet<CountryCode>, ScreeningError> {
    list.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(CountryCode::new)
        .collect()
}

fn join_country_list(codes: &BTreeSet<CountryCode>) -> String {
    codes
        .iter()
        .map(CountryCode::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

impl TryFrom<TenantSettingsRecord> for TenantPolicy {
    type Error = ScreeningError;

    fn try_from(record: TenantSettingsRecord) -> Result<Self, Self::Error> {
        if record.tenant_id.trim().is_empty() {
            return Err(ScreeningError::ValidationError(
                "tenantid must not be empty".to_string(),
            ));
        }
        let daily_limit = record.velocity_limits.daily;
        let per_transaction_limit = record.thresholds.per_transaction;
        if daily_limit < Decimal::ZERO || per_transaction_limit < Decimal::ZERO {
            return Err(ScreeningError::ValidationError(format!(
                "limits for tenant {} must not be negative",
                record.tenant_id
            )));
        }

        Ok(Self {
            allowed_source_countries: parse_country_list(
                &record.country_sanctions.source_country_code,
            )?,
            allowed_destination_countries: parse_country_list(
                &record.country_sanctions.destination_country_code,
            )?,
            tenant_id: record.tenant_id,
            per_transaction_limit,
            daily_limit,
        })
    }
}

impl From<TenantPolicy> for TenantSettingsRecord {
    fn from(policy: TenantPolicy) -> Self {
        Self {
            velocity_limits: VelocityLimitsRecord {
                daily: policy.daily_limit,
            },
            thresholds: ThresholdsRecord {
                per_transaction: policy.per_transaction_limit,
            },
            country_sanctions: CountrySanctionsRecord {
                source_country_code: join_country_list(&policy.allowed_source_countries),
                destination_country_code: join_country_list(&policy.allowed_destination_countries),
            },
            tenant_id: policy.tenant_id,
        }
    }
}
