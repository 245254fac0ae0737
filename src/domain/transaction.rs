use super::account::AccountInfo;
use super::velocity::VelocityKey;
use crate::error::ScreeningError;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Wire format of `transactionDate`.
pub const TRANSACTION_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Represents a positive monetary amount for transactions.
///
/// Ensures that transaction amounts are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, ScreeningError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(ScreeningError::ValidationError(format!(
                "amount must be positive, got {}",
                value
            )))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = ScreeningError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = ScreeningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| {
            ScreeningError::ValidationError(format!("malformed amount '{}'", s))
        })?;
        Self::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Credit,
    Debit,
}

/// A validated payment transaction.
///
/// Values are validated on the way in: a `Transaction` always carries a
/// positive amount, a parseable date and well-formed country codes. The
/// inbound JSON object is kept as received and is what gets serialized, so
/// publishing a transaction forwards the message unchanged, including the
/// producer's key spelling and country code casing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Transaction {
    pub correlation_id: String,
    pub tenant_id: String,
    /// Idempotency key for the whole orchestration.
    pub transaction_id: String,
    pub transaction_date: NaiveDateTime,
    pub direction: Direction,
    pub amount: Amount,
    pub currency: String,
    pub description: String,
    pub source_account: AccountInfo,
    pub destination_account: AccountInfo,
    wire: Map<String, Value>,
}

impl Transaction {
    /// The daily aggregate this transaction counts towards.
    pub fn velocity_key(&self) -> VelocityKey {
        VelocityKey::new(&self.tenant_id, self.transaction_date.date())
    }

    /// The inbound message exactly as it was received.
    pub fn wire(&self) -> &Map<String, Value> {
        &self.wire
    }
}

/// Inbound message as it arrives on the bus. Field names follow the camelCase
/// schema; the all-lowercase spellings of older producers are accepted too.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMessage {
    #[serde(alias = "correlationid", default)]
    pub correlation_id: String,
    #[serde(alias = "tenantid")]
    pub tenant_id: String,
    #[serde(alias = "transactionid")]
    pub transaction_id: String,
    #[serde(alias = "transactiondate")]
    pub transaction_date: String,
    pub direction: Direction,
    pub amount: String,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "sourceaccount")]
    pub source_account: AccountInfo,
    #[serde(alias = "destinationaccount")]
    pub destination_account: AccountInfo,
}

impl TryFrom<Value> for Transaction {
    type Error = ScreeningError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let msg = TransactionMessage::deserialize(&value)
            .map_err(|e| ScreeningError::ValidationError(e.to_string()))?;
        let Value::Object(wire) = value else {
            return Err(ScreeningError::ValidationError(
                "transaction message must be a JSON object".to_string(),
            ));
        };

        if msg.tenant_id.trim().is_empty() {
            return Err(ScreeningError::ValidationError(
                "tenantId must not be empty".to_string(),
            ));
        }
        if msg.transaction_id.trim().is_empty() {
            return Err(ScreeningError::ValidationError(
                "transactionId must not be empty".to_string(),
            ));
        }

        let transaction_date =
            NaiveDateTime::parse_from_str(msg.transaction_date.trim(), TRANSACTION_DATE_FORMAT)
                .map_err(|e| {
                    ScreeningError::ValidationError(format!(
                        "malformed transactionDate '{}': {}",
                        msg.transaction_date, e
                    ))
                })?;
        let amount = msg.amount.parse::<Amount>()?;

        Ok(Self {
            correlation_id: msg.correlation_id,
            tenant_id: msg.tenant_id,
            transaction_id: msg.transaction_id,
            transaction_date,
            direction: msg.direction,
            amount,
            currency: msg.currency,
            description: msg.description,
            source_account: msg.source_account,
            destination_account: msg.destination_account,
            wire,
        })
    }
}

impl From<Transaction> for Value {
    fn from(tx: Transaction) -> Self {
        Value::Object(tx.wire)
    }
}
