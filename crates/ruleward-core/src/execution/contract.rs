//! The contract between the rule scheduler and security rule executors

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::bulk_create::BulkCreate;
use super::messages::RuleMessageBuilder;
use super::wrap::{WrapHits, WrapSequences};
use crate::error::Result;
use crate::models::{
    CompleteRule, ExceptionListItem, ExecutionResult, ExecutionTuple, RuleExecutionOutcome,
    RuleParams,
};

/// Action group every security rule schedules its actions in
pub const DEFAULT_ACTION_GROUP: &str = "default";

/// Everything an executor needs for one tuple, besides params and state
pub struct RunOpts<P> {
    /// Builds rule-scoped messages
    pub build_rule_message: RuleMessageBuilder,
    /// Persists alerts
    pub bulk_create: Arc<dyn BulkCreate>,
    /// Exception items of the rule's exception lists
    pub exception_items: Arc<Vec<ExceptionListItem>>,
    /// The rule being executed
    pub complete_rule: Arc<CompleteRule<P>>,
    /// Page size for search-after queries
    pub search_after_size: u32,
    /// Window and signal budget of this execution
    pub tuple: ExecutionTuple,
    /// Turns hits into alerts
    pub wrap_hits: Arc<dyn WrapHits>,
    /// Turns EQL sequences into alerts
    pub wrap_sequences: Arc<dyn WrapSequences>,
}

impl<P> RunOpts<P> {
    /// Signals still allowed in this tuple given what `result` already created
    pub fn remaining_signals(&self, result: &ExecutionResult) -> usize {
        let budget = u64::from(self.tuple.max_signals);
        usize::try_from(budget.saturating_sub(result.created_signals_count)).unwrap_or(usize::MAX)
    }
}

impl<P> Clone for RunOpts<P> {
    fn clone(&self) -> Self {
        Self {
            build_rule_message: self.build_rule_message.clone(),
            bulk_create: Arc::clone(&self.bulk_create),
            exception_items: Arc::clone(&self.exception_items),
            complete_rule: Arc::clone(&self.complete_rule),
            search_after_size: self.search_after_size,
            tuple: self.tuple,
            wrap_hits: Arc::clone(&self.wrap_hits),
            wrap_sequences: Arc::clone(&self.wrap_sequences),
        }
    }
}

/// Identity and timing of the current execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Id of this execution
    pub execution_id: Uuid,
    /// When this execution started
    pub started_at: DateTime<Utc>,
    /// When the previous execution of the rule started
    pub previous_started_at: Option<DateTime<Utc>>,
    /// Space the rule runs in
    pub space_id: String,
}

/// An action scheduled by an executor for an alert instance
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAction<C> {
    /// Alert instance the action belongs to
    pub instance_id: String,
    /// Action group
    pub action_group: String,
    /// Context handed to the action
    pub context: C,
}

/// Collects actions scheduled during an execution
pub struct ActionScheduler<C> {
    actions: Mutex<Vec<ScheduledAction<C>>>,
}

impl<C> Default for ActionScheduler<C> {
    fn default() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
        }
    }
}

impl<C> ActionScheduler<C> {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the default action group for an alert instance
    pub fn schedule(&self, instance_id: impl Into<String>, context: C) {
        self.schedule_in_group(instance_id, DEFAULT_ACTION_GROUP, context);
    }

    /// Schedule an action group for an alert instance
    pub fn schedule_in_group(
        &self,
        instance_id: impl Into<String>,
        action_group: impl Into<String>,
        context: C,
    ) {
        self.actions.lock().push(ScheduledAction {
            instance_id: instance_id.into(),
            action_group: action_group.into(),
            context,
        });
    }

    /// Take everything scheduled so far
    pub fn drain(&self) -> Vec<ScheduledAction<C>> {
        std::mem::take(&mut *self.actions.lock())
    }
}

/// Input of one executor invocation
pub struct ExecutorOptions<P, S, C> {
    /// Rule parameters
    pub params: P,
    /// State carried over from the previous invocation
    pub state: S,
    /// Execution identity and timing
    pub context: ExecutionContext,
    /// Schedules actions for alert instances
    pub actions: Arc<ActionScheduler<C>>,
    /// Tuple, callbacks and helpers for this invocation
    pub run_opts: RunOpts<P>,
}

/// A security detection rule kind.
///
/// Implemented once per kind (query, threshold, EQL, ...). The wrapper calls
/// [`execute`](SecurityRuleType::execute) once per tuple; the returned state
/// is handed to the next call.
#[async_trait]
pub trait SecurityRuleType: Send + Sync + 'static {
    /// Rule parameters
    type Params: RuleParams;
    /// State carried between executions
    type State: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static;
    /// Context attached to scheduled actions
    type InstanceContext: Serialize + Send + Sync + 'static;

    /// Registered rule type id
    fn id(&self) -> &'static str {
        <Self::Params as RuleParams>::KIND.rule_type_id()
    }

    /// Display name of the rule type
    fn name(&self) -> &str;

    /// Run one tuple
    async fn execute(
        &self,
        options: ExecutorOptions<Self::Params, Self::State, Self::InstanceContext>,
    ) -> Result<RuleExecutionOutcome<Self::State>>;
}
