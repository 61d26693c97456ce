//! Registry of runnable rule types

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::execution::{CycleReport, RunRequest, ScheduledAction, SecurityRuleType, WrappedRuleType};
use crate::models::{CompleteRule, ExceptionListItem};

/// Cycle report with state and action contexts as JSON
pub type ErasedCycleReport = CycleReport<Value, Value>;

/// Input of a type-erased run
#[derive(Debug, Clone)]
pub struct ErasedRunRequest {
    /// The rule, with kind specific parameters as JSON
    pub complete_rule: CompleteRule<Value>,
    /// State of the previous cycle, `None` on first run
    pub state: Option<Value>,
    /// Start of the previous cycle
    pub previous_started_at: Option<DateTime<Utc>>,
    /// Start of this cycle
    pub started_at: DateTime<Utc>,
    /// Exception items of the rule's lists
    pub exception_items: Vec<ExceptionListItem>,
}

/// A rule type whose parameters and state cross the boundary as JSON
#[async_trait]
pub trait ErasedRuleType: Send + Sync {
    /// Registered rule type id
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Check that the parameters deserialize for this rule type
    fn validate_params(&self, params: &Value) -> Result<()>;

    /// Run one cycle
    async fn run_erased(&self, request: ErasedRunRequest) -> Result<ErasedCycleReport>;
}

#[async_trait]
impl<T: SecurityRuleType> ErasedRuleType for WrappedRuleType<T> {
    fn id(&self) -> &str {
        WrappedRuleType::<T>::id(self)
    }

    fn name(&self) -> &str {
        WrappedRuleType::<T>::name(self)
    }

    fn validate_params(&self, params: &Value) -> Result<()> {
        serde_json::from_value::<T::Params>(params.clone())
            .map(|_| ())
            .map_err(|e| Error::validation(format!("invalid {} params: {e}", self.id())))
    }

    async fn run_erased(&self, request: ErasedRunRequest) -> Result<ErasedCycleReport> {
        let ErasedRunRequest {
            complete_rule,
            state,
            previous_started_at,
            started_at,
            exception_items,
        } = request;

        let rule_params: T::Params = serde_json::from_value(complete_rule.rule_params)
            .map_err(|e| Error::validation(format!("invalid {} params: {e}", self.id())))?;
        let state: T::State = match state {
            Some(value) => serde_json::from_value(value)?,
            None => T::State::default(),
        };

        let report = self
            .run(RunRequest {
                complete_rule: CompleteRule {
                    alert_id: complete_rule.alert_id,
                    rule_params,
                    rule_config: complete_rule.rule_config,
                },
                state,
                previous_started_at,
                started_at,
                exception_items,
            })
            .await;

        let state = serde_json::to_value(&report.outcome.state)?;
        let scheduled_actions = report
            .scheduled_actions
            .into_iter()
            .map(|action| {
                Ok(ScheduledAction {
                    instance_id: action.instance_id,
                    action_group: action.action_group,
                    context: serde_json::to_value(&action.context)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CycleReport {
            execution_id: report.execution_id,
            outcome: report.outcome.result.with_state(state),
            status: report.status,
            tuples: report.tuples,
            remaining_gap: report.remaining_gap,
            scheduled_actions,
        })
    }
}

/// Rule types by id
#[derive(Default)]
pub struct RuleTypeRegistry {
    types: HashMap<String, Arc<dyn ErasedRuleType>>,
}

impl RuleTypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule type; ids must be unique
    pub fn register(&mut self, rule_type: Arc<dyn ErasedRuleType>) -> Result<()> {
        let id = rule_type.id().to_string();
        if self.types.contains_key(&id) {
            return Err(Error::validation(format!(
                "rule type {id} is already registered"
            )));
        }
        info!(rule_type = %id, name = rule_type.name(), "Registered rule type");
        self.types.insert(id, rule_type);
        Ok(())
    }

    /// Look up a rule type
    pub fn get(&self, id: &str) -> Result<Arc<dyn ErasedRuleType>> {
        self.types
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("rule type", id))
    }

    /// Whether a rule type is registered
    pub fn contains(&self, id: &str) -> bool {
        self.types.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.types.keys().cloned().collect();
        ids.sort();
        ids
    }
}
