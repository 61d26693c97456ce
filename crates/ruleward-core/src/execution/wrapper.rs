//! Runs a security rule type for one scheduling cycle

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::bulk_create::PersistenceBulkCreate;
use super::contract::{
    ActionScheduler, ExecutionContext, ExecutorOptions, RunOpts, ScheduledAction,
    SecurityRuleType,
};
use super::log::{
    ExecutionLogContext, ExecutionMetrics, RuleExecutionLogger, RuleExecutionStatus, StatusChange,
};
use super::messages::RuleMessageBuilder;
use super::range::{rule_range_tuples, RangeRequest};
use super::wrap::AlertFactory;
use crate::config::DetectionConfig;
use crate::models::{
    CompleteRule, ExceptionListItem, ExecutionResult, ExecutionTuple, RuleExecutionOutcome,
};
use crate::persistence::PersistenceService;

/// Messages listed in a status change before the rest are elided
const MAX_STATUS_MESSAGES: usize = 10;

/// Collaborators shared by every wrapped rule type
#[derive(Clone)]
pub struct WrapperProps {
    /// Detection settings
    pub config: DetectionConfig,
    /// Where alerts are written
    pub persistence: Arc<dyn PersistenceService>,
    /// Where status changes are recorded
    pub execution_logger: Arc<dyn RuleExecutionLogger>,
}

/// Turns security rule types into runnable rule types
pub struct SecurityRuleTypeWrapper {
    props: Arc<WrapperProps>,
}

impl SecurityRuleTypeWrapper {
    /// Create a wrapper
    pub fn new(props: WrapperProps) -> Self {
        Self {
            props: Arc::new(props),
        }
    }

    /// Wrap a rule type
    pub fn wrap<T: SecurityRuleType>(&self, rule_type: T) -> WrappedRuleType<T> {
        WrappedRuleType {
            rule_type: Arc::new(rule_type),
            props: Arc::clone(&self.props),
        }
    }
}

/// Input of one scheduling cycle
pub struct RunRequest<T: SecurityRuleType> {
    /// The rule
    pub complete_rule: CompleteRule<T::Params>,
    /// State returned by the previous cycle
    pub state: T::State,
    /// Start of the previous cycle
    pub previous_started_at: Option<DateTime<Utc>>,
    /// Start of this cycle
    pub started_at: DateTime<Utc>,
    /// Exception items of the rule's lists
    pub exception_items: Vec<ExceptionListItem>,
}

/// What one scheduling cycle produced
#[derive(Debug, Clone)]
pub struct CycleReport<S, C> {
    /// Id of the execution
    pub execution_id: Uuid,
    /// Merged result and the state for the next cycle
    pub outcome: RuleExecutionOutcome<S>,
    /// Final status of the cycle
    pub status: RuleExecutionStatus,
    /// Windows that were searched
    pub tuples: Vec<ExecutionTuple>,
    /// Time since the previous cycle that no window covered
    pub remaining_gap: Duration,
    /// Actions scheduled by the executor
    pub scheduled_actions: Vec<ScheduledAction<C>>,
}

impl<S, C> CycleReport<S, C> {
    /// Whether the cycle failed
    pub fn is_failure(&self) -> bool {
        self.status == RuleExecutionStatus::Failed
    }
}

/// A rule type ready to be driven by a scheduler
pub struct WrappedRuleType<T> {
    rule_type: Arc<T>,
    props: Arc<WrapperProps>,
}

impl<T> Clone for WrappedRuleType<T> {
    fn clone(&self) -> Self {
        Self {
            rule_type: Arc::clone(&self.rule_type),
            props: Arc::clone(&self.props),
        }
    }
}

impl<T: SecurityRuleType> WrappedRuleType<T> {
    /// Registered rule type id
    pub fn id(&self) -> &'static str {
        self.rule_type.id()
    }

    /// Display name of the rule type
    pub fn name(&self) -> &str {
        self.rule_type.name()
    }

    async fn log_status(&self, context: &ExecutionLogContext, change: StatusChange) {
        if let Err(e) = self
            .props
            .execution_logger
            .log_status_change(context, change)
            .await
        {
            warn!(rule_id = %context.rule_uuid, error = %e, "Failed to write execution status");
        }
    }

    /// Execute every tuple of one cycle and merge the results.
    ///
    /// Never fails: executor errors end the cycle with a failed, well-formed
    /// result and the state of the last successful tuple.
    pub async fn run(&self, request: RunRequest<T>) -> CycleReport<T::State, T::InstanceContext> {
        let RunRequest {
            complete_rule,
            state,
            previous_started_at,
            started_at,
            exception_items,
        } = request;

        let config = &self.props.config;
        let common = complete_rule.common().clone();
        let signals_index = common
            .output_index
            .clone()
            .unwrap_or_else(|| config.signals_index.clone());

        let execution_id = Uuid::new_v4();
        let log_context = ExecutionLogContext {
            execution_id,
            rule_uuid: complete_rule.alert_id,
            rule_name: complete_rule.rule_config.name.clone(),
            rule_type_id: self.rule_type.id().to_string(),
            space_id: config.space_id.clone(),
        };
        let messages = RuleMessageBuilder::new(
            complete_rule.alert_id.to_string(),
            Some(common.rule_id.clone()),
            signals_index.clone(),
            complete_rule.rule_config.name.clone(),
        );

        debug!("{}", messages.build(&["[+] Starting Signal Rule execution"]));
        self.log_status(
            &log_context,
            StatusChange::new(RuleExecutionStatus::Running, "running"),
        )
        .await;

        let max_signals = common.max_signals.min(config.max_signals);
        let range = match rule_range_tuples(&RangeRequest {
            previous_started_at,
            started_at,
            from: &common.from,
            to: &common.to,
            interval: &complete_rule.rule_config.interval,
            max_signals,
            max_gap_ratio: config.max_rule_gap_ratio,
        }) {
            Ok(range) => range,
            Err(e) => {
                let message = messages.build(&[format!(
                    "An error occurred during rule execution: message: \"{e}\""
                )]);
                self.log_status(
                    &log_context,
                    StatusChange::new(RuleExecutionStatus::Failed, message.clone()),
                )
                .await;
                return CycleReport {
                    execution_id,
                    outcome: ExecutionResult::failed(message).with_state(state),
                    status: RuleExecutionStatus::Failed,
                    tuples: Vec::new(),
                    remaining_gap: Duration::zero(),
                    scheduled_actions: Vec::new(),
                };
            }
        };

        let mut has_error = false;
        let mut result = ExecutionResult::new();

        if range.has_gap() {
            let gap = range.remaining_gap;
            let humanized = gap
                .to_std()
                .map(|d| humantime::format_duration(d).to_string())
                .unwrap_or_default();
            let gap_message = messages.build(&[format!(
                "{humanized} ({}ms) were not queried between this rule execution and the last execution, \
                 so signals may have been missed. Consider increasing your look behind time or adding more \
                 rule workers.",
                gap.num_milliseconds()
            )]);
            warn!("{gap_message}");
            has_error = true;
            result.push_error(gap_message.clone());
            self.log_status(
                &log_context,
                StatusChange::new(RuleExecutionStatus::Failed, gap_message).with_metrics(
                    ExecutionMetrics {
                        execution_gap_duration_s: Some(gap.num_seconds()),
                        ..ExecutionMetrics::default()
                    },
                ),
            )
            .await;
        }

        let factory = Arc::new(AlertFactory::new(
            &complete_rule,
            signals_index.clone(),
            config.space_id.clone(),
        ));
        let run_opts_base = RunOpts {
            build_rule_message: messages.clone(),
            bulk_create: Arc::new(PersistenceBulkCreate::new(
                Arc::clone(&self.props.persistence),
                messages.clone(),
            )),
            exception_items: Arc::new(exception_items),
            complete_rule: Arc::new(complete_rule),
            search_after_size: config.search_after_size,
            tuple: range.tuples[0],
            wrap_hits: factory.clone(),
            wrap_sequences: factory,
        };
        let actions = Arc::new(ActionScheduler::new());
        let context = ExecutionContext {
            execution_id,
            started_at,
            previous_started_at,
            space_id: config.space_id.clone(),
        };

        let mut run_state = state;
        let mut execution_error = None;
        for tuple in &range.tuples {
            let mut run_opts = run_opts_base.clone();
            run_opts.tuple = *tuple;

            let options = ExecutorOptions {
                params: run_opts.complete_rule.rule_params.clone(),
                state: run_state.clone(),
                context: context.clone(),
                actions: Arc::clone(&actions),
                run_opts,
            };

            match self.rule_type.execute(options).await {
                Ok(outcome) => {
                    let (tuple_result, next_state) = outcome.into_parts();
                    result = result.merge(tuple_result);
                    run_state = next_state;
                }
                Err(e) => {
                    let message = messages.build(&[format!(
                        "An error occurred during rule execution: message: \"{e}\""
                    )]);
                    result = result.merge(ExecutionResult::failed(message.clone()));
                    execution_error = Some(message);
                    break;
                }
            }
        }

        result.last_lookback_date = range.earliest_from();

        let metrics = ExecutionMetrics {
            total_search_duration_ms: Some(result.total_search_duration_ms()),
            total_indexing_duration_ms: Some(result.total_indexing_duration_ms()),
            execution_gap_duration_s: range
                .has_gap()
                .then(|| range.remaining_gap.num_seconds()),
        };

        let mut status = if has_error {
            RuleExecutionStatus::Failed
        } else {
            RuleExecutionStatus::Succeeded
        };

        if !result.warning_messages.is_empty() {
            if !has_error {
                status = RuleExecutionStatus::PartialFailure;
            }
            self.log_status(
                &log_context,
                StatusChange::new(
                    RuleExecutionStatus::PartialFailure,
                    truncate_messages(&result.warning_messages),
                )
                .with_metrics(metrics.clone()),
            )
            .await;
        }

        if result.success {
            info!(
                "{}",
                messages.build(&[format!(
                    "[+] Finished indexing {} signals into {}",
                    result.created_signals_count, signals_index
                )])
            );
            if !has_error && !result.warning {
                self.log_status(
                    &log_context,
                    StatusChange::new(RuleExecutionStatus::Succeeded, "succeeded")
                        .with_metrics(metrics),
                )
                .await;
            }
        } else {
            status = RuleExecutionStatus::Failed;
            let message = execution_error.unwrap_or_else(|| {
                format!(
                    "Bulk Indexing of signals failed: {}",
                    truncate_messages(&result.errors)
                )
            });
            self.log_status(
                &log_context,
                StatusChange::new(RuleExecutionStatus::Failed, message).with_metrics(metrics),
            )
            .await;
        }

        CycleReport {
            execution_id,
            outcome: result.with_state(run_state),
            status,
            tuples: range.tuples.clone(),
            remaining_gap: range.remaining_gap,
            scheduled_actions: actions.drain(),
        }
    }
}

fn truncate_messages(messages: &[String]) -> String {
    if messages.len() <= MAX_STATUS_MESSAGES {
        return messages.join(", ");
    }
    let mut kept: Vec<String> = messages[..MAX_STATUS_MESSAGES].to_vec();
    kept.push(format!(
        "and {} more",
        messages.len() - MAX_STATUS_MESSAGES
    ));
    kept.join(", ")
}
