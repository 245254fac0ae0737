use crate::domain::orchestration::HistoryEvent;
use crate::domain::policy::TenantPolicy;
use crate::domain::ports::{
    OrchestrationHistory, PolicyCatalogue, RoutingDispatcher, VelocityAggregateStore,
};
use crate::domain::transaction::{Amount, Transaction};
use crate::domain::velocity::{VelocityAggregate, VelocityKey};
use crate::domain::violation::{HoldingMessage, Violation, ViolationEvent};
use crate::error::{Result, ScreeningError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

/// How long an increment may wait for a contended aggregate by default.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(1);

type Slot = Arc<Mutex<VelocityAggregate>>;

/// A thread-safe in-memory store for daily velocity aggregates.
///
/// Each `(tenant, date)` key has its own mutex, so increments on one key are
/// serialized while other keys proceed independently. The outer map is only
/// locked long enough to find or create a slot. Waiting longer than the
/// configured lock wait for a slot is a `ConcurrencyConflict`, reported to
/// callers as a transient failure.
#[derive(Clone)]
pub struct InMemoryVelocityStore {
    slots: Arc<RwLock<HashMap<VelocityKey, Slot>>>,
    lock_wait: Duration,
}

impl Default for InMemoryVelocityStore {
    fn default() -> Self {
        Self::with_lock_wait(DEFAULT_LOCK_WAIT)
    }
}

impl InMemoryVelocityStore {
    /// Creates a new, empty in-memory velocity store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        Self {
            slots: Arc::new(RwLock::new(HashMap::new())),
            lock_wait,
        }
    }

    /// Current aggregate for `key`, if any increment was ever applied.
    pub async fn snapshot(&self, key: &VelocityKey) -> Option<VelocityAggregate> {
        let slot = self.slots.read().await.get(key).cloned()?;
        let aggregate = slot.lock().await;
        Some(aggregate.clone())
    }

    async fn slot(&self, key: &VelocityKey) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(VelocityAggregate::new(key)))),
        )
    }
}

#[async_trait]
impl VelocityAggregateStore for InMemoryVelocityStore {
    async fn get_processed(&self, key: &VelocityKey) -> Result<Decimal> {
        let slot = match self.slots.read().await.get(key) {
            Some(slot) => Arc::clone(slot),
            None => return Ok(Decimal::ZERO),
        };
        let aggregate = timeout(self.lock_wait, slot.lock())
            .await
            .map_err(|_| ScreeningError::ConcurrencyConflict(key.to_string()).escalate_conflict())?;
        Ok(aggregate.payment_processed)
    }

    async fn increment_processed(
        &self,
        key: &VelocityKey,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<Decimal> {
        let slot = self.slot(key).await;
        let mut aggregate = timeout(self.lock_wait, slot.lock())
            .await
            .map_err(|_| ScreeningError::ConcurrencyConflict(key.to_string()).escalate_conflict())?;
        // No await between here and the end of the critical section, so the
        // update cannot be cancelled half way.
        aggregate.apply(amount, idempotency_key)
    }
}

#[derive(Default)]
struct HistoryState {
    active: HashMap<String, Vec<HistoryEvent>>,
    archived: HashMap<String, Vec<HistoryEvent>>,
}

/// A thread-safe in-memory orchestration step log.
#[derive(Default, Clone)]
pub struct InMemoryHistory {
    state: Arc<RwLock<HistoryState>>,
}

impl InMemoryHistory {
    /// Creates a new, empty in-memory history.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_archived(&self, instance_id: &str) -> bool {
        self.state.read().await.archived.contains_key(instance_id)
    }

    pub async fn active_instances(&self) -> Vec<String> {
        self.state.read().await.active.keys().cloned().collect()
    }
}

#[async_trait]
impl OrchestrationHistory for InMemoryHistory {
    async fn load(&self, instance_id: &str) -> Result<Vec<HistoryEvent>> {
        let state = self.state.read().await;
        Ok(state
            .active
            .get(instance_id)
            .or_else(|| state.archived.get(instance_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, instance_id: &str, event: &HistoryEvent) -> Result<()> {
        let mut state = self.state.write().await;
        if state.archived.contains_key(instance_id) {
            return Err(ScreeningError::Fatal(format!(
                "instance {} is archived",
                instance_id
            )));
        }
        state
            .active
            .entry(instance_id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn archive(&self, instance_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(events) = state.active.remove(instance_id) {
            state.archived.insert(instance_id.to_string(), events);
        }
        Ok(())
    }
}

#[derive(Default)]
struct Queues {
    processing: Vec<Transaction>,
    holding: Vec<HoldingMessage>,
    violation_events: Vec<ViolationEvent>,
    processed_ids: HashSet<String>,
    held_ids: HashSet<String>,
    event_ids: HashSet<String>,
}

/// Records published messages in memory. Publishing the same transaction to
/// the same destination twice keeps a single message.
#[derive(Default, Clone)]
pub struct InMemoryDispatcher {
    queues: Arc<RwLock<Queues>>,
}

impl InMemoryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn processing(&self) -> Vec<Transaction> {
        self.queues.read().await.processing.clone()
    }

    pub async fn holding(&self) -> Vec<HoldingMessage> {
        self.queues.read().await.holding.clone()
    }

    pub async fn violation_events(&self) -> Vec<ViolationEvent> {
        self.queues.read().await.violation_events.clone()
    }
}

#[async_trait]
impl RoutingDispatcher for InMemoryDispatcher {
    async fn route_to_processing(&self, transaction: &Transaction) -> Result<()> {
        let mut queues = self.queues.write().await;
        if queues.processed_ids.insert(transaction.transaction_id.clone()) {
            queues.processing.push(transaction.clone());
        }
        Ok(())
    }

    async fn route_to_holding(
        &self,
        transaction: &Transaction,
        violations: &[Violation],
    ) -> Result<()> {
        let mut queues = self.queues.write().await;
        if queues.held_ids.insert(transaction.transaction_id.clone()) {
            queues.holding.push(HoldingMessage {
                transaction: transaction.clone(),
                violations: violations.to_vec(),
            });
        }
        Ok(())
    }

    async fn emit_violation_event(
        &self,
        tenant_id: &str,
        transaction_id: &str,
        violations: &[Violation],
    ) -> Result<()> {
        let mut queues = self.queues.write().await;
        if queues.event_ids.insert(transaction_id.to_string()) {
            queues.violation_events.push(ViolationEvent {
                tenant_id: tenant_id.to_string(),
                transaction_id: transaction_id.to_string(),
                violations: violations.to_vec(),
            });
        }
        Ok(())
    }
}

/// A policy catalogue held in memory. Edits become visible to a policy cache
/// only after it refreshes.
#[derive(Default, Clone)]
pub struct InMemoryPolicyCatalogue {
    policies: Arc<RwLock<Vec<TenantPolicy>>>,
}

impl InMemoryPolicyCatalogue {
    pub fn new(policies: Vec<TenantPolicy>) -> Self {
        Self {
            policies: Arc::new(RwLock::new(policies)),
        }
    }

    /// Inserts or replaces the policy of `policy.tenant_id`.
    pub async fn upsert(&self, policy: TenantPolicy) {
        let mut policies = self.policies.write().await;
        match policies.iter_mut().find(|p| p.tenant_id == policy.tenant_id) {
            Some(existing) => *existing = policy,
            None => policies.push(policy),
        }
    }
}

#[async_trait]
impl PolicyCatalogue for InMemoryPolicyCatalogue {
    async fn load_all(&self) -> Result<Vec<TenantPolicy>> {
        Ok(self.policies.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn key(tenant: &str) -> VelocityKey {
        VelocityKey::new(tenant, NaiveDate::from_ymd_opt(2024, 2, 15).unwrap())
    }

    fn amount(value: Decimal) -> Amount {
        Amount::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_absent_aggregate_reads_zero() {
        let store = InMemoryVelocityStore::new();
        assert_eq!(store.get_processed(&key("345")).await.unwrap(), Decimal::ZERO);
        assert!(store.snapshot(&key("345")).await.is_none());
    }

    #[tokio::test]
    async fn test_increment_twice_with_same_key_applies_once() {
        let store = InMemoryVelocityStore::new();
        let first = store
            .increment_processed(&key("345"), amount(dec!(345.87)), "tx-1")
            .await
            .unwrap();
        let second = store
            .increment_processed(&key("345"), amount(dec!(345.87)), "tx-1")
            .await
            .unwrap();
        assert_eq!(first, dec!(345.87));
        assert_eq!(second, dec!(345.87));
        assert_eq!(store.get_processed(&key("345")).await.unwrap(), dec!(345.87));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = InMemoryVelocityStore::new();
        store
            .increment_processed(&key("345"), amount(dec!(10)), "tx-1")
            .await
            .unwrap();
        store
            .increment_processed(&key("678"), amount(dec!(20)), "tx-2")
            .await
            .unwrap();
        assert_eq!(store.get_processed(&key("345")).await.unwrap(), dec!(10));
        assert_eq!(store.get_processed(&key("678")).await.unwrap(), dec!(20));
    }

    #[tokio::test]
    async fn test_contended_key_times_out_as_transient() {
        let store = InMemoryVelocityStore::with_lock_wait(Duration::from_millis(20));
        store
            .increment_processed(&key("345"), amount(dec!(1)), "tx-1")
            .await
            .unwrap();

        let slot = store.slot(&key("345")).await;
        let _held = slot.lock().await;

        let err = store
            .increment_processed(&key("345"), amount(dec!(1)), "tx-2")
            .await
            .unwrap_err();
        assert!(err.is_transient());

        // A different key is not blocked by the held one.
        store
            .increment_processed(&key("678"), amount(dec!(1)), "tx-3")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_history_archive() {
        let history = InMemoryHistory::new();
        history
            .append("tx-1", &HistoryEvent::RoutedToProcessing)
            .await
            .unwrap();
        assert_eq!(history.active_instances().await, vec!["tx-1".to_string()]);

        history.archive("tx-1").await.unwrap();
        assert!(history.is_archived("tx-1").await);
        assert!(history.active_instances().await.is_empty());
        assert_eq!(history.load("tx-1").await.unwrap().len(), 1);
        assert!(history
            .append("tx-1", &HistoryEvent::RoutedToHolding)
            .await
            .is_err());
        assert!(history.load("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catalogue_upsert() {
        let catalogue = InMemoryPolicyCatalogue::default();
        let policy: TenantPolicy = serde_json::from_str(
            r#"{"tenantid": "345", "velocitylimits": {"daily": "5000"}, "thresholds": {"pertransaction": "1000"}}"#,
        )
        .unwrap();
        catalogue.upsert(policy.clone()).await;
        let mut raised = policy.clone();
        raised.daily_limit = dec!(9000);
        catalogue.upsert(raised).await;

        let all = catalogue.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].daily_limit, dec!(9000));
    }
}
