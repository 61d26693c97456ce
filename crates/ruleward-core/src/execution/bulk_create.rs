//! Bulk create callback handed to rule executors

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::messages::RuleMessageBuilder;
use crate::error::{Error, Result};
use crate::models::{duration_string, ExecutionResult, WrappedAlert};
use crate::persistence::PersistenceService;

/// Outcome of one bulk create call
#[derive(Debug, Clone, PartialEq)]
pub struct BulkCreateResponse {
    /// Whether the call succeeded
    pub success: bool,
    /// Time the call took, in milliseconds
    pub bulk_create_duration: String,
    /// Number of alerts newly created
    pub created_items_count: u64,
    /// Alerts newly created
    pub created_items: Vec<WrappedAlert>,
    /// Distinct failure messages
    pub errors: Vec<String>,
}

impl BulkCreateResponse {
    /// Created alerts in their flattened result form
    pub fn created_signals(&self) -> Result<Vec<serde_json::Value>> {
        self.created_items
            .iter()
            .map(WrappedAlert::to_created_signal)
            .collect()
    }

    /// Response for a call that had nothing to write
    pub fn empty() -> Self {
        Self {
            success: true,
            bulk_create_duration: "0".to_string(),
            created_items_count: 0,
            created_items: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Persists wrapped alerts on behalf of an executor
#[async_trait]
pub trait BulkCreate: Send + Sync {
    /// Persist alerts and report what was created
    async fn bulk_create(&self, alerts: Vec<WrappedAlert>) -> Result<BulkCreateResponse>;
}

/// Bulk create backed by a [`PersistenceService`]
pub struct PersistenceBulkCreate {
    persistence: Arc<dyn PersistenceService>,
    messages: RuleMessageBuilder,
}

impl PersistenceBulkCreate {
    /// Create a bulk create for one rule execution
    pub fn new(persistence: Arc<dyn PersistenceService>, messages: RuleMessageBuilder) -> Self {
        Self {
            persistence,
            messages,
        }
    }
}

#[async_trait]
impl BulkCreate for PersistenceBulkCreate {
    async fn bulk_create(&self, alerts: Vec<WrappedAlert>) -> Result<BulkCreateResponse> {
        if alerts.is_empty() {
            return Ok(BulkCreateResponse::empty());
        }

        let start = Instant::now();
        let outcome = self
            .persistence
            .persist_alerts(alerts)
            .await
            .map_err(|e| Error::BulkCreate(self.messages.build(&[e.to_string()])))?;
        let duration = duration_string(start.elapsed());

        debug!(
            "{}",
            self.messages.build(&[format!(
                "individual bulk process time took: {duration} milliseconds"
            )])
        );

        let mut errors: Vec<String> = Vec::new();
        for error in outcome.errors {
            if !errors.contains(&error) {
                errors.push(error);
            }
        }

        Ok(BulkCreateResponse {
            success: true,
            bulk_create_duration: duration,
            created_items_count: outcome.created.len() as u64,
            created_items: outcome.created,
            errors,
        })
    }
}

impl ExecutionResult {
    /// Fold a bulk create response into the result
    ///
    /// The result is left untouched when an alert cannot be converted.
    pub fn add_bulk_create(&mut self, response: BulkCreateResponse) -> Result<()> {
        let created_signals = response.created_signals()?;
        self.success = self.success && response.success;
        self.bulk_create_times.push(response.bulk_create_duration);
        self.created_signals_count += response.created_items_count;
        self.created_signals.extend(created_signals);
        for error in response.errors {
            self.push_error(error);
        }
        Ok(())
    }
}
