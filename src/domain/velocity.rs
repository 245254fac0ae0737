use super::transaction::Amount;
use crate::error::ScreeningError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifies one daily aggregate: a tenant on a calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VelocityKey {
    pub tenant_id: String,
    pub date: NaiveDate,
}

impl VelocityKey {
    pub fn new(tenant_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            date,
        }
    }

    /// Key used by persistent backends.
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.tenant_id, self.date.format("%Y-%m-%d"))
    }
}

impl fmt::Display for VelocityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Cumulative amount processed for a tenant on one day.
///
/// The total only grows, and only through [`VelocityAggregate::apply`], which
/// records the idempotency key of every increment it applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityAggregate {
    #[serde(rename = "tenantid")]
    pub tenant_id: String,
    pub date: NaiveDate,
    #[serde(rename = "paymentProcessed")]
    pub payment_processed: Decimal,
    #[serde(rename = "appliedKeys", default)]
    pub applied_keys: BTreeSet<String>,
}

impl VelocityAggregate {
    pub fn new(key: &VelocityKey) -> Self {
        Self {
            tenant_id: key.tenant_id.clone(),
            date: key.date,
            payment_processed: Decimal::ZERO,
            applied_keys: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> VelocityKey {
        VelocityKey::new(&self.tenant_id, self.date)
    }

    pub fn is_applied(&self, idempotency_key: &str) -> bool {
        self.applied_keys.contains(idempotency_key)
    }

    /// Adds `amount` unless `idempotency_key` was already applied, and returns
    /// the resulting total. Either both the key and the amount are recorded or
    /// neither is.
    pub fn apply(&mut self, amount: Amount, idempotency_key: &str) -> Result<Decimal, ScreeningError> {
        if self.is_applied(idempotency_key) {
            return Ok(self.payment_processed);
        }
        let total = self
            .payment_processed
            .checked_add(amount.value())
            .ok_or_else(|| {
                ScreeningError::Fatal(format!("velocity aggregate overflow for {}", self.key()))
            })?;
        self.applied_keys.insert(idempotency_key.to_string());
        self.payment_processed = total;
        Ok(total)
    }

    /// Checks invariants of a record read back from storage.
    pub fn validate(&self) -> Result<(), ScreeningError> {
        if self.payment_processed < Decimal::ZERO {
            return Err(ScreeningError::Fatal(format!(
                "negative velocity aggregate {} for {}",
                self.payment_processed,
                self.key()
            )));
        }
        Ok(())
    }
}
