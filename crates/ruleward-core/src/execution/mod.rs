//! Security rule execution
//!
//! Defines the contract rule executors implement and the wrapper that runs
//! them: search windows, bulk create, alert wrapping and status logging.

mod bulk_create;
mod contract;
mod log;
mod messages;
mod range;
mod wrap;
mod wrapper;

pub use bulk_create::{BulkCreate, BulkCreateResponse, PersistenceBulkCreate};
pub use contract::{
    ActionScheduler, ExecutionContext, ExecutorOptions, RunOpts, ScheduledAction,
    SecurityRuleType, DEFAULT_ACTION_GROUP,
};
pub use log::{
    ExecutionLogContext, ExecutionLogEntry, ExecutionMetrics, MemoryExecutionLog,
    RuleExecutionLogger, RuleExecutionStatus, StatusChange, TracingExecutionLogger,
};
pub use messages::RuleMessageBuilder;
pub use range::{
    catchup_intervals, gap_between_runs, parse_date_math, parse_interval, rule_range_tuples,
    RangeRequest, RuleRangeTuples,
};
pub use wrap::{generate_id, AlertFactory, EqlSequence, WrapHits, WrapSequences};
pub use wrapper::{CycleReport, RunRequest, SecurityRuleTypeWrapper, WrappedRuleType, WrapperProps};
