#![allow(dead_code)]

use std::time::Duration;
use txmonitor::application::activity::{ActivityRunner, RetryPolicy};
use txmonitor::application::orchestrator::OrchestrationController;
use txmonitor::domain::policy::TenantPolicy;
use txmonitor::domain::ports::VelocityAggregateStoreBox;
use txmonitor::domain::transaction::Transaction;
use txmonitor::infrastructure::in_memory::{
    InMemoryDispatcher, InMemoryHistory, InMemoryPolicyCatalogue, InMemoryVelocityStore,
};
use txmonitor::infrastructure::policy_cache::PolicyCache;

pub const TENANT: &str = "345";

/// perTxLimit=1000, dailyLimit=5000, allowed source GBR, allowed destination HKG.
pub fn policy() -> TenantPolicy {
    serde_json::from_value(serde_json::json!({
        "tenantid": TENANT,
        "velocitylimits": {"daily": "5000"},
        "thresholds": {"pertransaction": "1000"},
        "countrysanctions": {"sourcecountrycode": "GBR", "destinationcountrycode": "HKG"}
    }))
    .unwrap()
}

pub fn transaction(id: &str, amount: &str) -> Transaction {
    transaction_with(TENANT, id, amount, "GBR", "HKG")
}

pub fn transaction_with(
    tenant_id: &str,
    id: &str,
    amount: &str,
    source: &str,
    destination: &str,
) -> Transaction {
    serde_json::from_value(serde_json::json!({
        "correlationId": format!("corr-{}", id),
        "tenantId": tenant_id,
        "transactionId": id,
        "transactionDate": "2024-02-15 11:36:22",
        "direction": "Debit",
        "amount": amount,
        "currency": "EUR",
        "description": "test payment",
        "sourceAccount": {"accountNo": "12345678", "sortCode": "40-11-18", "countryCode": source},
        "destinationAccount": {"accountNo": "87654321", "sortCode": "20-00-00", "countryCode": destination}
    }))
    .unwrap()
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        backoff_multiplier: 2,
        max_backoff: Duration::from_millis(10),
    }
}

/// In-memory adapters shared with a controller, for inspection after a run.
#[derive(Clone, Default)]
pub struct Harness {
    pub velocity: InMemoryVelocityStore,
    pub dispatcher: InMemoryDispatcher,
    pub history: InMemoryHistory,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn controller(&self) -> OrchestrationController {
        self.controller_with(Box::new(self.velocity.clone()), fast_retry(3))
            .await
    }

    pub async fn controller_with(
        &self,
        velocity: VelocityAggregateStoreBox,
        retry: RetryPolicy,
    ) -> OrchestrationController {
        let catalogue = InMemoryPolicyCatalogue::new(vec![policy()]);
        let policies = PolicyCache::load(Box::new(catalogue)).await.unwrap();
        OrchestrationController::new(
            Box::new(policies),
            velocity,
            Box::new(self.dispatcher.clone()),
            Box::new(self.history.clone()),
            ActivityRunner::new(retry, Duration::from_millis(200)),
        )
    }
}
