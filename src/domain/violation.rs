use super::transaction::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    PerTransactionLimitExceeded,
    DailyLimitExceeded,
    UnauthorisedSourceCountry,
    UnauthorisedDestinationCountry,
}

/// A detected breach of a configured compliance rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub message: String,
}

impl Violation {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Violations in rule-definition order.
pub type ViolationList = Vec<Violation>;

/// Message published to the holding queue: the transaction plus its violations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingMessage {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub violations: ViolationList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub tenant_id: String,
    pub transaction_id: String,
    pub violations: ViolationList,
}
