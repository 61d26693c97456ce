//! Rule execution status log

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::Result;

/// Status of a rule execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleExecutionStatus {
    /// Scheduled but not started
    #[serde(rename = "going to run")]
    GoingToRun,
    /// In progress
    #[serde(rename = "running")]
    Running,
    /// Completed without problems
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Completed with warnings
    #[serde(rename = "partial failure")]
    PartialFailure,
    /// Failed
    #[serde(rename = "failed")]
    Failed,
}

impl RuleExecutionStatus {
    /// Whether the status ends an execution
    pub fn is_final(self) -> bool {
        matches!(
            self,
            RuleExecutionStatus::Succeeded
                | RuleExecutionStatus::PartialFailure
                | RuleExecutionStatus::Failed
        )
    }
}

impl fmt::Display for RuleExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleExecutionStatus::GoingToRun => "going to run",
            RuleExecutionStatus::Running => "running",
            RuleExecutionStatus::Succeeded => "succeeded",
            RuleExecutionStatus::PartialFailure => "partial failure",
            RuleExecutionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Timing metrics attached to a status change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Time spent searching, in milliseconds
    pub total_search_duration_ms: Option<f64>,
    /// Time spent indexing alerts, in milliseconds
    pub total_indexing_duration_ms: Option<f64>,
    /// Uncovered time since the previous run, in seconds
    pub execution_gap_duration_s: Option<i64>,
}

/// Identity of the execution a status change belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogContext {
    /// Execution id
    pub execution_id: Uuid,
    /// Rule saved object id
    pub rule_uuid: Uuid,
    /// Rule name
    pub rule_name: String,
    /// Registered rule type id
    pub rule_type_id: String,
    /// Space the rule runs in
    pub space_id: String,
}

/// A recorded status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    /// New status
    pub status: RuleExecutionStatus,
    /// Explanation
    pub message: String,
    /// Metrics, when known
    pub metrics: ExecutionMetrics,
    /// When the change was logged
    pub logged_at: DateTime<Utc>,
}

impl StatusChange {
    /// Status change stamped with the current time
    pub fn new(status: RuleExecutionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metrics: ExecutionMetrics::default(),
            logged_at: Utc::now(),
        }
    }

    /// Attach metrics
    #[must_use]
    pub fn with_metrics(mut self, metrics: ExecutionMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Sink for rule execution status changes
#[async_trait]
pub trait RuleExecutionLogger: Send + Sync {
    /// Record a status change of an execution
    async fn log_status_change(
        &self,
        context: &ExecutionLogContext,
        change: StatusChange,
    ) -> Result<()>;
}

/// Writes status changes to the tracing subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingExecutionLogger;

#[async_trait]
impl RuleExecutionLogger for TracingExecutionLogger {
    async fn log_status_change(
        &self,
        context: &ExecutionLogContext,
        change: StatusChange,
    ) -> Result<()> {
        match change.status {
            RuleExecutionStatus::Failed => error!(
                rule_id = %context.rule_uuid,
                execution_id = %context.execution_id,
                rule_type = %context.rule_type_id,
                status = %change.status,
                "{}", change.message
            ),
            RuleExecutionStatus::PartialFailure => warn!(
                rule_id = %context.rule_uuid,
                execution_id = %context.execution_id,
                rule_type = %context.rule_type_id,
                status = %change.status,
                "{}", change.message
            ),
            _ => info!(
                rule_id = %context.rule_uuid,
                execution_id = %context.execution_id,
                rule_type = %context.rule_type_id,
                status = %change.status,
                search_ms = ?change.metrics.total_search_duration_ms,
                indexing_ms = ?change.metrics.total_indexing_duration_ms,
                "{}", change.message
            ),
        }
        Ok(())
    }
}

/// One entry of the in-memory execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Execution the change belongs to
    pub context: ExecutionLogContext,
    /// The change
    pub change: StatusChange,
}

/// Keeps status changes per rule in memory
#[derive(Default)]
pub struct MemoryExecutionLog {
    entries: RwLock<HashMap<Uuid, Vec<ExecutionLogEntry>>>,
}

impl MemoryExecutionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// All changes logged for a rule, oldest first
    pub fn entries_for(&self, rule_uuid: Uuid) -> Vec<ExecutionLogEntry> {
        self.entries
            .read()
            .get(&rule_uuid)
            .cloned()
            .unwrap_or_default()
    }

    /// Most recent change for a rule
    pub fn last_status(&self, rule_uuid: Uuid) -> Option<StatusChange> {
        self.entries
            .read()
            .get(&rule_uuid)
            .and_then(|entries| entries.last())
            .map(|entry| entry.change.clone())
    }
}

#[async_trait]
impl RuleExecutionLogger for MemoryExecutionLog {
    async fn log_status_change(
        &self,
        context: &ExecutionLogContext,
        change: StatusChange,
    ) -> Result<()> {
        self.entries
            .write()
            .entry(context.rule_uuid)
            .or_default()
            .push(ExecutionLogEntry {
                context: context.clone(),
                change,
            });
        Ok(())
    }
}
