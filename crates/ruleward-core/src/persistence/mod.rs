//! Persistence of generated alerts
//!
//! Rule executors never write alerts directly; they go through the bulk
//! create callback, which delegates to a [`PersistenceService`].

mod memory;

pub use memory::MemoryAlertStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::WrappedAlert;

/// Outcome of persisting a batch of alerts
#[derive(Debug, Clone, Default)]
pub struct PersistOutcome {
    /// Alerts that were newly written
    pub created: Vec<WrappedAlert>,
    /// Per-document failures
    pub errors: Vec<String>,
}

/// Storage backend for alerts
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Write alerts, skipping ids that already exist
    async fn persist_alerts(&self, alerts: Vec<WrappedAlert>) -> Result<PersistOutcome>;
}
