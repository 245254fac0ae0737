use super::activity::ActivityRunner;
use crate::domain::orchestration::{HistoryEvent, OrchestrationInstance, OrchestrationState, Verdict};
use crate::domain::ports::{
    OrchestrationHistoryBox, RoutingDispatcherBox, TenantPolicyStoreBox,
    VelocityAggregateStoreBox,
};
use crate::domain::rules;
use crate::domain::transaction::Transaction;
use crate::error::{Result, ScreeningError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Drives one orchestration instance per transaction.
///
/// Every step outcome is appended to the instance history before the next
/// step starts. Running a transaction whose instance already has history
/// resumes from the first unrecorded step, and running one whose instance is
/// terminal returns the recorded outcome. Runs of the same instance id are
/// serialized, so a redelivery that arrives while the first delivery is in
/// flight waits for it and then sees its history. The controller itself never
/// retries; transient failures are retried by the [`ActivityRunner`].
pub struct OrchestrationController {
    policies: TenantPolicyStoreBox,
    velocity: VelocityAggregateStoreBox,
    dispatcher: RoutingDispatcherBox,
    history: OrchestrationHistoryBox,
    activities: ActivityRunner,
    running: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrchestrationController {
    /// Creates a new `OrchestrationController`.
    ///
    /// # Arguments
    ///
    /// * `policies` - Tenant policy lookup.
    /// * `velocity` - The shared daily aggregate store.
    /// * `dispatcher` - Processing/holding queue publication.
    /// * `history` - Durable step log of orchestration instances.
    /// * `activities` - Retry and deadline boundary for all external calls.
    pub fn new(
        policies: TenantPolicyStoreBox,
        velocity: VelocityAggregateStoreBox,
        dispatcher: RoutingDispatcherBox,
        history: OrchestrationHistoryBox,
        activities: ActivityRunner,
    ) -> Self {
        Self {
            policies,
            velocity,
            dispatcher,
            history,
            activities,
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Screens a transaction and routes it, resuming any recorded progress.
    ///
    /// Returns the verdict of a completed instance. A failed instance returns
    /// the error it failed with, both on the run that failed and on any later
    /// redelivery.
    #[instrument(
        name = "orchestration",
        skip_all,
        fields(instance_id = %transaction.transaction_id, tenant_id = %transaction.tenant_id)
    )]
    pub async fn run(&self, transaction: Transaction) -> Result<Verdict> {
        let instance_id = transaction.transaction_id.clone();
        let slot = self.instance_slot(&instance_id).await;
        let result = {
            let _exclusive = slot.lock().await;
            self.resume(transaction).await
        };
        drop(slot);
        self.release_slot(&instance_id).await;
        result
    }

    async fn instance_slot(&self, instance_id: &str) -> Arc<Mutex<()>> {
        let mut running = self.running.lock().await;
        Arc::clone(running.entry(instance_id.to_string()).or_default())
    }

    /// Forgets the slot of `instance_id` once no other run holds or awaits it.
    async fn release_slot(&self, instance_id: &str) {
        let mut running = self.running.lock().await;
        if running
            .get(instance_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            running.remove(instance_id);
        }
    }

    async fn resume(&self, transaction: Transaction) -> Result<Verdict> {
        let instance_id = transaction.transaction_id.clone();
        let recorded = self
            .activities
            .read("load_history", || self.history.load(&instance_id))
            .await?;
        let mut instance = OrchestrationInstance::replay(&instance_id, recorded)?;

        if let Some(outcome) = instance.outcome() {
            debug!("instance already terminal, returning recorded outcome");
            self.archive(&instance_id).await?;
            return outcome;
        }

        match instance.transaction() {
            None => {
                info!("Started orchestration");
                self.record(&mut instance, HistoryEvent::Started { transaction })
                    .await?;
            }
            Some(recorded) if *recorded != transaction => {
                warn!("redelivered payload differs from recorded transaction, resuming recorded one");
            }
            Some(_) => debug!(state = ?instance.state(), "resuming orchestration"),
        }

        match self.drive(&mut instance).await {
            Ok(verdict) => {
                self.archive(&instance_id).await?;
                Ok(verdict)
            }
            Err(err) => {
                if let Some(outcome) = self.recorded_outcome(&instance_id).await {
                    warn!(error = %err, "instance already finished elsewhere, returning recorded outcome");
                    return outcome;
                }
                error!(error = %err, "orchestration failed");
                let failed = HistoryEvent::Failed {
                    kind: err.kind(),
                    message: err.detail(),
                };
                match self.record(&mut instance, failed).await {
                    Ok(()) => self.archive(&instance_id).await?,
                    Err(record_err) => {
                        error!(error = %record_err, "could not record failure, instance stays active");
                    }
                }
                Err(err)
            }
        }
    }

    /// Outcome of `instance_id` as currently stored, if it is terminal.
    async fn recorded_outcome(&self, instance_id: &str) -> Option<Result<Verdict>> {
        let events = self.history.load(instance_id).await.ok()?;
        OrchestrationInstance::replay(instance_id, events)
            .ok()?
            .outcome()
    }

    async fn drive(&self, instance: &mut OrchestrationInstance) -> Result<Verdict> {
        loop {
            match instance.state() {
                OrchestrationState::Start => {
                    let tenant_id = instance.require_transaction()?.tenant_id.clone();
                    let policy = self
                        .activities
                        .read("get_policy", || self.policies.get_policy(&tenant_id))
                        .await?;
                    self.record(instance, HistoryEvent::PolicyLoaded { policy })
                        .await?;
                }
                OrchestrationState::PolicyLoaded => {
                    let key = instance.require_transaction()?.velocity_key();
                    let prior_processed = self
                        .activities
                        .read("get_processed", || self.velocity.get_processed(&key))
                        .await?;
                    self.record(instance, HistoryEvent::AggregateLoaded { prior_processed })
                        .await?;
                }
                OrchestrationState::AggregateLoaded => {
                    let violations = rules::assess(
                        instance.require_transaction()?,
                        instance.require_policy()?,
                        instance.require_prior_processed()?,
                    );
                    self.record(instance, HistoryEvent::Assessed { violations })
                        .await?;
                }
                OrchestrationState::Assessed => self.route(instance).await?,
                OrchestrationState::Routed => {
                    let violated = !instance.require_violations()?.is_empty();
                    self.record(instance, HistoryEvent::Completed { violated })
                        .await?;
                }
                OrchestrationState::Completed { .. } | OrchestrationState::Failed => {
                    return instance.outcome().unwrap_or_else(|| {
                        Err(ScreeningError::Fatal(format!(
                            "terminal instance {} has no outcome",
                            instance.id()
                        )))
                    });
                }
            }
        }
    }

    /// Performs the routing steps not yet recorded. Held transactions leave
    /// the daily aggregate untouched.
    async fn route(&self, instance: &mut OrchestrationInstance) -> Result<()> {
        let transaction = instance.require_transaction()?.clone();
        let violations = instance.require_violations()?.clone();

        if violations.is_empty() {
            if instance.new_total().is_none() {
                let key = transaction.velocity_key();
                let new_total = self
                    .activities
                    .effect("increment_processed", || {
                        self.velocity.increment_processed(
                            &key,
                            transaction.amount,
                            &transaction.transaction_id,
                        )
                    })
                    .await?;
                debug!(%new_total, "daily aggregate updated");
                self.record(instance, HistoryEvent::IncrementApplied { new_total })
                    .await?;
            }
            if !instance.routed_to_processing() {
                self.activities
                    .effect("route_to_processing", || {
                        self.dispatcher.route_to_processing(&transaction)
                    })
                    .await?;
                info!("transaction sent to processing queue");
                self.record(instance, HistoryEvent::RoutedToProcessing).await?;
            }
        } else {
            if !instance.routed_to_holding() {
                self.activities
                    .effect("route_to_holding", || {
                        self.dispatcher.route_to_holding(&transaction, &violations)
                    })
                    .await?;
                info!("transaction sent to holding queue for assessment");
                self.record(instance, HistoryEvent::RoutedToHolding).await?;
            }
            if !instance.violation_event_emitted() {
                self.activities
                    .effect("emit_violation_event", || {
                        self.dispatcher.emit_violation_event(
                            &transaction.tenant_id,
                            &transaction.transaction_id,
                            &violations,
                        )
                    })
                    .await?;
                let summary = violations
                    .iter()
                    .map(|v| v.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(violations = %summary, "violations detected");
                self.record(instance, HistoryEvent::ViolationEventEmitted)
                    .await?;
            }
        }
        Ok(())
    }

    /// Persists `event`, then applies it to the in-memory instance.
    async fn record(&self, instance: &mut OrchestrationInstance, event: HistoryEvent) -> Result<()> {
        instance.check(&event)?;
        let instance_id = instance.id().to_string();
        self.activities
            .effect("append_history", || self.history.append(&instance_id, &event))
            .await?;
        instance.apply(event)
    }

    async fn archive(&self, instance_id: &str) -> Result<()> {
        self.activities
            .effect("archive_history", || self.history.archive(instance_id))
            .await
    }
}
