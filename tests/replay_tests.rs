mod common;

use async_trait::async_trait;
use common::{Harness, fast_retry, policy, transaction, transaction_with};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use txmonitor::application::activity::ActivityRunner;
use txmonitor::application::orchestrator::OrchestrationController;
use txmonitor::domain::orchestration::{HistoryEvent, Verdict};
use txmonitor::domain::policy::TenantPolicy;
use txmonitor::domain::ports::{
    OrchestrationHistory, RoutingDispatcher, TenantPolicyStore, VelocityAggregateStore,
};
use txmonitor::domain::transaction::{Amount, Transaction};
use txmonitor::domain::velocity::VelocityKey;
use txmonitor::domain::violation::Violation;
use txmonitor::error::{FailureKind, Result, ScreeningError};
use txmonitor::infrastructure::in_memory::{InMemoryPolicyCatalogue, InMemoryVelocityStore};
use txmonitor::infrastructure::policy_cache::PolicyCache;

async fn record(harness: &Harness, id: &str, events: Vec<HistoryEvent>) {
    for event in events {
        harness.history.append(id, &event).await.unwrap();
    }
}

#[tokio::test]
async fn test_resume_after_increment_does_not_reapply() {
    let harness = Harness::new();
    let tx = transaction("tx-1", "345.87");
    let new_total = harness
        .velocity
        .increment_processed(&tx.velocity_key(), tx.amount, "tx-1")
        .await
        .unwrap();
    record(
        &harness,
        "tx-1",
        vec![
            HistoryEvent::Started { transaction: tx.clone() },
            HistoryEvent::PolicyLoaded { policy: policy() },
            HistoryEvent::AggregateLoaded { prior_processed: Decimal::ZERO },
            HistoryEvent::Assessed { violations: vec![] },
            HistoryEvent::IncrementApplied { new_total },
        ],
    )
    .await;

    let controller = harness.controller().await;
    assert_eq!(controller.run(tx.clone()).await.unwrap(), Verdict::Clear);

    assert_eq!(harness.dispatcher.processing().await.len(), 1);
    assert_eq!(
        harness.velocity.get_processed(&tx.velocity_key()).await.unwrap(),
        dec!(345.87)
    );
    let history = harness.history.load("tx-1").await.unwrap();
    assert_eq!(history.last(), Some(&HistoryEvent::Completed { violated: false }));
}

#[tokio::test]
async fn test_unrecorded_increment_is_deduplicated_on_resume() {
    let harness = Harness::new();
    let tx = transaction("tx-2", "100");
    // The increment landed but the process died before recording it.
    harness
        .velocity
        .increment_processed(&tx.velocity_key(), tx.amount, "tx-2")
        .await
        .unwrap();
    record(
        &harness,
        "tx-2",
        vec![
            HistoryEvent::Started { transaction: tx.clone() },
            HistoryEvent::PolicyLoaded { policy: policy() },
            HistoryEvent::AggregateLoaded { prior_processed: Decimal::ZERO },
            HistoryEvent::Assessed { violations: vec![] },
        ],
    )
    .await;

    let controller = harness.controller().await;
    controller.run(tx.clone()).await.unwrap();

    assert_eq!(
        harness.velocity.get_processed(&tx.velocity_key()).await.unwrap(),
        dec!(100)
    );
    assert_eq!(harness.dispatcher.processing().await.len(), 1);
}

#[tokio::test]
async fn test_resume_uses_recorded_reads() {
    let harness = Harness::new();
    let tx = transaction("tx-3", "300");
    // Recorded prior total is authoritative even though the store now differs.
    record(
        &harness,
        "tx-3",
        vec![
            HistoryEvent::Started { transaction: tx.clone() },
            HistoryEvent::PolicyLoaded { policy: policy() },
            HistoryEvent::AggregateLoaded { prior_processed: dec!(4800) },
        ],
    )
    .await;

    let controller = harness.controller().await;
    let verdict = controller.run(tx).await.unwrap();

    assert!(verdict.is_violated());
    assert_eq!(harness.dispatcher.holding().await.len(), 1);
}

#[tokio::test]
async fn test_failed_instance_returns_recorded_error_on_redelivery() {
    let harness = Harness::new();
    let controller = harness.controller().await;
    let tx = transaction_with("999", "tx-4", "10", "GBR", "HKG");

    assert!(matches!(controller.run(tx.clone()).await, Err(ScreeningError::NotFound(_))));
    let history_len = harness.history.load("tx-4").await.unwrap().len();

    assert!(matches!(controller.run(tx).await, Err(ScreeningError::NotFound(_))));
    assert_eq!(harness.history.load("tx-4").await.unwrap().len(), history_len);
}

#[tokio::test]
async fn test_redelivered_payload_cannot_override_recorded_one() {
    let harness = Harness::new();
    let controller = harness.controller().await;
    let original = transaction("tx-5", "100");
    record(
        &harness,
        "tx-5",
        vec![HistoryEvent::Started { transaction: original.clone() }],
    )
    .await;

    let tampered = transaction("tx-5", "900");
    controller.run(tampered).await.unwrap();

    assert_eq!(harness.dispatcher.processing().await, vec![original.clone()]);
    assert_eq!(
        harness.velocity.get_processed(&original.velocity_key()).await.unwrap(),
        dec!(100)
    );
}

/// Velocity store whose reads never finish in time.
struct SlowReads;

#[async_trait]
impl VelocityAggregateStore for SlowReads {
    async fn get_processed(&self, _key: &VelocityKey) -> Result<Decimal> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Decimal::ZERO)
    }

    async fn increment_processed(
        &self,
        _key: &VelocityKey,
        _amount: Amount,
        _idempotency_key: &str,
    ) -> Result<Decimal> {
        panic!("increment must not run after a failed read");
    }
}

async fn assert_failed_without_effects(harness: &Harness, tx: &Transaction) {
    assert!(harness.dispatcher.processing().await.is_empty());
    assert!(harness.dispatcher.holding().await.is_empty());
    assert!(harness.dispatcher.violation_events().await.is_empty());
    assert!(harness.velocity.snapshot(&tx.velocity_key()).await.is_none());

    let history = harness.history.load(&tx.transaction_id).await.unwrap();
    assert!(matches!(
        history.last(),
        Some(HistoryEvent::Failed { kind: FailureKind::Fatal, .. })
    ));
    assert!(harness.history.is_archived(&tx.transaction_id).await);
}

#[tokio::test]
async fn test_aggregate_read_deadline_fails_before_any_effect() {
    let harness = Harness::new();
    let controller = harness.controller_with(Box::new(SlowReads), fast_retry(2)).await;
    let tx = transaction("tx-6", "10");

    let result = controller.run(tx.clone()).await;

    assert!(matches!(result, Err(ScreeningError::Fatal(m)) if m.contains("exceeded deadline")));
    assert_failed_without_effects(&harness, &tx).await;
}

/// Policy store whose lookups never finish in time.
struct SlowPolicies;

#[async_trait]
impl TenantPolicyStore for SlowPolicies {
    async fn get_policy(&self, _tenant_id: &str) -> Result<TenantPolicy> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(policy())
    }
}

#[tokio::test]
async fn test_policy_read_deadline_fails_before_any_effect() {
    let harness = Harness::new();
    let controller = OrchestrationController::new(
        Box::new(SlowPolicies),
        Box::new(harness.velocity.clone()),
        Box::new(harness.dispatcher.clone()),
        Box::new(harness.history.clone()),
        ActivityRunner::new(fast_retry(2), Duration::from_millis(50)),
    );
    let tx = transaction("tx-8", "10");

    let result = controller.run(tx.clone()).await;

    assert!(matches!(result, Err(ScreeningError::Fatal(m)) if m.contains("get_policy exceeded deadline")));
    assert_failed_without_effects(&harness, &tx).await;
}

/// Dispatcher that blocks processing until released.
#[derive(Clone, Default)]
struct GatedDispatcher {
    entered: Arc<Notify>,
}

#[async_trait]
impl RoutingDispatcher for GatedDispatcher {
    async fn route_to_processing(&self, _transaction: &Transaction) -> Result<()> {
        self.entered.notify_one();
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn route_to_holding(&self, _: &Transaction, _: &[Violation]) -> Result<()> {
        Ok(())
    }

    async fn emit_violation_event(&self, _: &str, _: &str, _: &[Violation]) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_cancelled_instance_resumes_without_double_increment() {
    let harness = Harness::new();
    let velocity = InMemoryVelocityStore::new();
    let gate = GatedDispatcher::default();
    let policies = PolicyCache::load(Box::new(InMemoryPolicyCatalogue::new(vec![policy()])))
        .await
        .unwrap();
    let blocked = Arc::new(OrchestrationController::new(
        Box::new(policies),
        Box::new(velocity.clone()),
        Box::new(gate.clone()),
        Box::new(harness.history.clone()),
        ActivityRunner::new(fast_retry(1), Duration::from_secs(1)),
    ));

    let tx = transaction("tx-7", "250");
    let task = {
        let blocked = Arc::clone(&blocked);
        let tx = tx.clone();
        tokio::spawn(async move { blocked.run(tx).await })
    };
    gate.entered.notified().await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(velocity.get_processed(&tx.velocity_key()).await.unwrap(), dec!(250));

    let resumed = harness
        .controller_with(Box::new(velocity.clone()), fast_retry(1))
        .await;
    assert_eq!(resumed.run(tx.clone()).await.unwrap(), Verdict::Clear);

    assert_eq!(velocity.get_processed(&tx.velocity_key()).await.unwrap(), dec!(250));
    assert_eq!(harness.dispatcher.processing().await, vec![tx]);
    assert!(harness.history.is_archived("tx-7").await);
}
