use super::policy::TenantPolicy;
use super::transaction::Transaction;
use super::violation::ViolationList;
use crate::error::{FailureKind, Result, ScreeningError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One recorded step of an orchestration instance.
///
/// Every step outcome is appended to the instance history before the
/// instance advances, so a resumed instance re-derives its decisions from
/// these events instead of repeating the calls that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    Started { transaction: Transaction },
    PolicyLoaded { policy: TenantPolicy },
    AggregateLoaded { prior_processed: Decimal },
    Assessed { violations: ViolationList },
    IncrementApplied { new_total: Decimal },
    RoutedToProcessing,
    RoutedToHolding,
    ViolationEventEmitted,
    Completed { violated: bool },
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationState {
    Start,
    PolicyLoaded,
    AggregateLoaded,
    Assessed,
    Routed,
    Completed { violated: bool },
    Failed,
}

impl OrchestrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationState::Completed { .. } | OrchestrationState::Failed
        )
    }
}

/// Result of a completed screening.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Clear,
    Violated(ViolationList),
}

impl Verdict {
    pub fn from_violations(violations: ViolationList) -> Self {
        if violations.is_empty() {
            Verdict::Clear
        } else {
            Verdict::Violated(violations)
        }
    }

    pub fn is_violated(&self) -> bool {
        matches!(self, Verdict::Violated(_))
    }
}

/// One run of the screening workflow for a single transaction, rebuilt from
/// its recorded history.
#[derive(Debug, Clone)]
pub struct OrchestrationInstance {
    id: String,
    history: Vec<HistoryEvent>,
    transaction: Option<Transaction>,
    policy: Option<TenantPolicy>,
    prior_processed: Option<Decimal>,
    violations: Option<ViolationList>,
    new_total: Option<Decimal>,
    routed_to_processing: bool,
    routed_to_holding: bool,
    violation_event_emitted: bool,
    completed: Option<bool>,
    failure: Option<(FailureKind, String)>,
}

impl OrchestrationInstance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            history: Vec::new(),
            transaction: None,
            policy: None,
            prior_processed: None,
            violations: None,
            new_total: None,
            routed_to_processing: false,
            routed_to_holding: false,
            violation_event_emitted: false,
            completed: None,
            failure: None,
        }
    }

    /// Rebuilds an instance by folding its recorded history. A history that
    /// could not have been produced by the workflow is rejected as fatal.
    pub fn replay(id: impl Into<String>, history: Vec<HistoryEvent>) -> Result<Self> {
        let mut instance = Self::new(id);
        for event in history {
            instance.apply(event)?;
        }
        Ok(instance)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn history(&self) -> &[HistoryEvent] {
        &self.history
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn policy(&self) -> Option<&TenantPolicy> {
        self.policy.as_ref()
    }

    pub fn prior_processed(&self) -> Option<Decimal> {
        self.prior_processed
    }

    pub fn violations(&self) -> Option<&ViolationList> {
        self.violations.as_ref()
    }

    pub fn new_total(&self) -> Option<Decimal> {
        self.new_total
    }

    pub fn routed_to_processing(&self) -> bool {
        self.routed_to_processing
    }

    pub fn routed_to_holding(&self) -> bool {
        self.routed_to_holding
    }

    pub fn violation_event_emitted(&self) -> bool {
        self.violation_event_emitted
    }

    pub fn state(&self) -> OrchestrationState {
        if self.failure.is_some() {
            return OrchestrationState::Failed;
        }
        if let Some(violated) = self.completed {
            return OrchestrationState::Completed { violated };
        }
        match (&self.violations, self.prior_processed, &self.policy) {
            (Some(violations), _, _) => {
                let routed = if violations.is_empty() {
                    self.new_total.is_some() && self.routed_to_processing
                } else {
                    self.routed_to_holding && self.violation_event_emitted
                };
                if routed {
                    OrchestrationState::Routed
                } else {
                    OrchestrationState::Assessed
                }
            }
            (None, Some(_), _) => OrchestrationState::AggregateLoaded,
            (None, None, Some(_)) => OrchestrationState::PolicyLoaded,
            (None, None, None) => OrchestrationState::Start,
        }
    }

    /// The recorded outcome, once the instance is terminal.
    pub fn outcome(&self) -> Option<Result<Verdict>> {
        if let Some((kind, message)) = &self.failure {
            return Some(Err(ScreeningError::from_failure(*kind, message.clone())));
        }
        self.completed.map(|_| {
            Ok(Verdict::from_violations(
                self.violations.clone().unwrap_or_default(),
            ))
        })
    }

    pub fn require_transaction(&self) -> Result<&Transaction> {
        self.transaction.as_ref().ok_or_else(|| self.missing("transaction"))
    }

    pub fn require_policy(&self) -> Result<&TenantPolicy> {
        self.policy.as_ref().ok_or_else(|| self.missing("policy"))
    }

    pub fn require_prior_processed(&self) -> Result<Decimal> {
        self.prior_processed
            .ok_or_else(|| self.missing("prior aggregate"))
    }

    pub fn require_violations(&self) -> Result<&ViolationList> {
        self.violations
            .as_ref()
            .ok_or_else(|| self.missing("assessment"))
    }

    fn missing(&self, what: &str) -> ScreeningError {
        ScreeningError::Fatal(format!(
            "instance {} has no recorded {} in state {:?}",
            self.id,
            what,
            self.state()
        ))
    }

    /// Checks that `event` is a legal next step without applying it.
    pub fn check(&self, event: &HistoryEvent) -> Result<()> {
        let state = self.state();
        let clear = self.violations.as_ref().map(|v| v.is_empty());
        let legal = match event {
            HistoryEvent::Started { .. } => self.history.is_empty(),
            HistoryEvent::PolicyLoaded { .. } => {
                state == OrchestrationState::Start && self.transaction.is_some()
            }
            HistoryEvent::AggregateLoaded { .. } => state == OrchestrationState::PolicyLoaded,
            HistoryEvent::Assessed { .. } => state == OrchestrationState::AggregateLoaded,
            HistoryEvent::IncrementApplied { .. } => {
                state == OrchestrationState::Assessed
                    && clear == Some(true)
                    && self.new_total.is_none()
            }
            HistoryEvent::RoutedToProcessing => {
                state == OrchestrationState::Assessed
                    && clear == Some(true)
                    && self.new_total.is_some()
                    && !self.routed_to_processing
            }
            HistoryEvent::RoutedToHolding => {
                state == OrchestrationState::Assessed
                    && clear == Some(false)
                    && !self.routed_to_holding
            }
            HistoryEvent::ViolationEventEmitted => {
                state == OrchestrationState::Assessed
                    && self.routed_to_holding
                    && !self.violation_event_emitted
            }
            HistoryEvent::Completed { violated } => {
                state == OrchestrationState::Routed && clear == Some(!violated)
            }
            HistoryEvent::Failed { .. } => !state.is_terminal(),
        };

        if legal {
            Ok(())
        } else {
            Err(ScreeningError::Fatal(format!(
                "illegal step {:?} for instance {} in state {:?}",
                event_name(event),
                self.id,
                state
            )))
        }
    }

    /// Applies a recorded step.
    pub fn apply(&mut self, event: HistoryEvent) -> Result<()> {
        self.check(&event)?;
        match &event {
            HistoryEvent::Started { transaction } => self.transaction = Some(transaction.clone()),
            HistoryEvent::PolicyLoaded { policy } => self.policy = Some(policy.clone()),
            HistoryEvent::AggregateLoaded { prior_processed } => {
                self.prior_processed = Some(*prior_processed)
            }
            HistoryEvent::Assessed { violations } => self.violations = Some(violations.clone()),
            HistoryEvent::IncrementApplied { new_total } => self.new_total = Some(*new_total),
            HistoryEvent::RoutedToProcessing => self.routed_to_processing = true,
            HistoryEvent::RoutedToHolding => self.routed_to_holding = true,
            HistoryEvent::ViolationEventEmitted => self.violation_event_emitted = true,
            HistoryEvent::Completed { violated } => self.completed = Some(*violated),
            HistoryEvent::Failed { kind, message } => {
                self.failure = Some((*kind, message.clone()))
            }
        }
        self.history.push(event);
        Ok(())
    }
}

fn event_name(event: &HistoryEvent) -> &'static str {
    match event {
        HistoryEvent::Started { .. } => "started",
        HistoryEvent::PolicyLoaded { .. } => "policy_loaded",
        HistoryEvent::AggregateLoaded { .. } => "aggregate_loaded",
        HistoryEvent::Assessed { .. } => "assessed",
        HistoryEvent::IncrementApplied { .. } => "increment_applied",
        HistoryEvent::RoutedToProcessing => "routed_to_processing",
        HistoryEvent::RoutedToHolding => "routed_to_holding",
        HistoryEvent::ViolationEventEmitted => "violation_event_emitted",
        HistoryEvent::Completed { .. } => "completed",
        HistoryEvent::Failed { .. } => "failed",
    }
}
