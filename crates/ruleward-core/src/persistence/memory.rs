//! In-memory alert store

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::{PersistOutcome, PersistenceService};
use crate::error::Result;
use crate::models::WrappedAlert;

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, usize>,
    alerts: Vec<WrappedAlert>,
}

/// Alert store keeping everything in process memory, in insertion order
#[derive(Default)]
pub struct MemoryAlertStore {
    inner: RwLock<Inner>,
}

impl MemoryAlertStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored alerts
    pub fn len(&self) -> usize {
        self.inner.read().alerts.len()
    }

    /// Whether nothing has been stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up an alert by id
    pub fn get(&self, id: &str) -> Option<WrappedAlert> {
        let inner = self.inner.read();
        inner.by_id.get(id).map(|&pos| inner.alerts[pos].clone())
    }

    /// All alerts written to `index`
    pub fn list_index(&self, index: &str) -> Vec<WrappedAlert> {
        self.inner
            .read()
            .alerts
            .iter()
            .filter(|a| a.index == index)
            .cloned()
            .collect()
    }

    /// All stored alerts
    pub fn all(&self) -> Vec<WrappedAlert> {
        self.inner.read().alerts.clone()
    }
}

#[async_trait]
impl PersistenceService for MemoryAlertStore {
    async fn persist_alerts(&self, alerts: Vec<WrappedAlert>) -> Result<PersistOutcome> {
        let mut inner = self.inner.write();
        let mut outcome = PersistOutcome::default();
        let requested = alerts.len();

        for alert in alerts {
            if inner.by_id.contains_key(&alert.id) {
                continue;
            }
            let pos = inner.alerts.len();
            inner.by_id.insert(alert.id.clone(), pos);
            inner.alerts.push(alert.clone());
            outcome.created.push(alert);
        }

        debug!(
            requested,
            created = outcome.created.len(),
            "Persisted alerts in memory"
        );

        Ok(outcome)
    }
}
