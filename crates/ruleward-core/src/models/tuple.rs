//! Execution tuple: the time window and signal budget of one rule run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Time window and signal budget for a single rule execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTuple {
    /// Start of the window (inclusive)
    pub from: DateTime<Utc>,
    /// End of the window
    pub to: DateTime<Utc>,
    /// Upper bound on signals created during this execution
    pub max_signals: u32,
}

impl ExecutionTuple {
    /// Create a tuple, rejecting windows where `from` is after `to`
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>, max_signals: u32) -> Result<Self> {
        if from > to {
            return Err(Error::validation(format!(
                "execution tuple start {} is after its end {}",
                from.to_rfc3339(),
                to.to_rfc3339()
            )));
        }
        Ok(Self {
            from,
            to,
            max_signals,
        })
    }

    /// Length of the window
    pub fn duration(&self) -> chrono::Duration {
        self.to - self.from
    }

    /// Whether a timestamp falls inside `[from, to]`
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }

    /// Shift the whole window back by `by`, keeping its length.
    ///
    /// `None` when the shifted window falls outside the representable range.
    pub(crate) fn shifted_back(&self, by: chrono::Duration) -> Option<Self> {
        Some(Self {
            from: self.from.checked_sub_signed(by)?,
            to: self.to.checked_sub_signed(by)?,
            max_signals: self.max_signals,
        })
    }
}
