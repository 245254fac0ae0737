//! Compliance rules evaluated against every transaction.
//!
//! Each rule is an independent check. All of them run for every transaction,
//! so a transaction that breaks several rules reports every breach.

use super::policy::TenantPolicy;
use super::transaction::Transaction;
use super::violation::{Violation, ViolationCode, ViolationList};
use rust_decimal::Decimal;

/// A single rule: returns a violation when the transaction breaches it.
pub type Rule = fn(&Transaction, &TenantPolicy, Decimal) -> Option<Violation>;

/// The rules in definition order. Violations are reported in this order.
pub const RULES: [Rule; 4] = [
    per_transaction_limit,
    daily_limit,
    source_country,
    destination_country,
];

/// Evaluates every rule against `transaction`, given the amount already
/// processed for the tenant that day.
pub fn assess(
    transaction: &Transaction,
    policy: &TenantPolicy,
    prior_processed: Decimal,
) -> ViolationList {
    assess_with(&RULES, transaction, policy, prior_processed)
}

/// Evaluates an explicit rule set, in the order given.
pub fn assess_with(
    rules: &[Rule],
    transaction: &Transaction,
    policy: &TenantPolicy,
    prior_processed: Decimal,
) -> ViolationList {
    rules
        .iter()
        .filter_map(|rule| rule(transaction, policy, prior_processed))
        .collect()
}

pub fn per_transaction_limit(
    transaction: &Transaction,
    policy: &TenantPolicy,
    _prior_processed: Decimal,
) -> Option<Violation> {
    let amount = transaction.amount.value();
    (amount > policy.per_transaction_limit).then(|| {
        Violation::new(
            ViolationCode::PerTransactionLimitExceeded,
            format!(
                "per-transaction limit exceeded, limit {}, amount {}",
                policy.per_transaction_limit, amount
            ),
        )
    })
}

/// Checks `prior_processed + amount` against the daily limit.
///
/// `prior_processed` is the snapshot read before assessment, not the total at
/// increment time. Instances on the same tenant and day that assess
/// concurrently each see a snapshot without the others' amounts, so together
/// they can clear more than the daily limit. The stored total itself stays
/// exact.
pub fn daily_limit(
    transaction: &Transaction,
    policy: &TenantPolicy,
    prior_processed: Decimal,
) -> Option<Violation> {
    let amount = transaction.amount.value();
    // An overflowing sum is beyond any representable limit.
    let exceeded = prior_processed
        .checked_add(amount)
        .is_none_or(|total| total > policy.daily_limit);
    exceeded.then(|| {
        Violation::new(
            ViolationCode::DailyLimitExceeded,
            format!(
                "daily limit exceeded, limit {}, already processed {}, amount {}",
                policy.daily_limit, prior_processed, amount
            ),
        )
    })
}

pub fn source_country(
    transaction: &Transaction,
    policy: &TenantPolicy,
    _prior_processed: Decimal,
) -> Option<Violation> {
    let code = &transaction.source_account.country_code;
    (!policy.allows_source(code)).then(|| {
        Violation::new(
            ViolationCode::UnauthorisedSourceCountry,
            format!("unauthorised source country {}", code),
        )
    })
}

pub fn destination_country(
    transaction: &Transaction,
    policy: &TenantPolicy,
    _prior_processed: Decimal,
) -> Option<Violation> {
    let code = &transaction.destination_account.country_code;
    (!policy.allows_destination(code)).then(|| {
        Violation::new(
            ViolationCode::UnauthorisedDestinationCountry,
            format!("unauthorised destination country {}", code),
        )
    })
}
