use super::orchestration::HistoryEvent;
use super::policy::TenantPolicy;
use super::transaction::{Amount, Transaction};
use super::velocity::VelocityKey;
use super::violation::Violation;
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Read-only lookup of tenant compliance policies.
#[async_trait]
pub trait TenantPolicyStore: Send + Sync {
    /// Fails with `NotFound` for an unknown tenant.
    async fn get_policy(&self, tenant_id: &str) -> Result<TenantPolicy>;
}

/// Source of the full policy catalogue, read on load and refresh.
#[async_trait]
pub trait PolicyCatalogue: Send + Sync {
    async fn load_all(&self) -> Result<Vec<TenantPolicy>>;
}

/// Per-tenant, per-day processed amounts.
#[async_trait]
pub trait VelocityAggregateStore: Send + Sync {
    /// Returns zero when nothing was processed for the key yet.
    async fn get_processed(&self, key: &VelocityKey) -> Result<Decimal>;

    /// Adds `amount` at most once per `idempotency_key` and returns the new
    /// total. Repeated calls with the same key return the current total.
    async fn increment_processed(
        &self,
        key: &VelocityKey,
        amount: Amount,
        idempotency_key: &str,
    ) -> Result<Decimal>;
}

/// Publication of screened transactions. Every operation is idempotent per
/// transaction id.
#[async_trait]
pub trait RoutingDispatcher: Send + Sync {
    async fn route_to_processing(&self, transaction: &Transaction) -> Result<()>;
    async fn route_to_holding(&self, transaction: &Transaction, violations: &[Violation])
    -> Result<()>;
    async fn emit_violation_event(
        &self,
        tenant_id: &str,
        transaction_id: &str,
        violations: &[Violation],
    ) -> Result<()>;
}

/// Durable step log of orchestration instances.
#[async_trait]
pub trait OrchestrationHistory: Send + Sync {
    /// Recorded events of an instance, active or archived. Empty if unknown.
    async fn load(&self, instance_id: &str) -> Result<Vec<HistoryEvent>>;
    async fn append(&self, instance_id: &str, event: &HistoryEvent) -> Result<()>;
    /// Moves a terminal instance out of the active set.
    async fn archive(&self, instance_id: &str) -> Result<()>;
}

pub type TenantPolicyStoreBox = Box<dyn TenantPolicyStore>;
pub type PolicyCatalogueBox = Box<dyn PolicyCatalogue>;
pub type VelocityAggregateStoreBox = Box<dyn VelocityAggregateStore>;
pub type RoutingDispatcherBox = Box<dyn RoutingDispatcher>;
pub type OrchestrationHistoryBox = Box<dyn OrchestrationHistory>;
