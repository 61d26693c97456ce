//! Execution result returned by rule executors

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Format a duration the way result timings are reported: milliseconds
/// with two decimals (e.g. `"12.50"`).
pub fn duration_string(duration: Duration) -> String {
    format!("{:.2}", duration.as_secs_f64() * 1000.0)
}

/// Aggregated outcome of searching and bulk-creating signals.
///
/// Field names serialize exactly as schedulers expect them
/// (`bulkCreateTimes`, `createdSignalsCount`, ...). Every sequence is always
/// present, including on failed results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Duration of each bulk create call, in milliseconds
    pub bulk_create_times: Vec<String>,
    /// Number of signals reported as created
    pub created_signals_count: u64,
    /// The created signals
    pub created_signals: Vec<serde_json::Value>,
    /// Accumulated error messages
    pub errors: Vec<String>,
    /// Earliest point in time the execution looked back to
    #[serde(default, rename = "lastLookbackDate")]
    pub last_lookback_date: Option<DateTime<Utc>>,
    /// Duration of each search-after query, in milliseconds
    pub search_after_times: Vec<String>,
    /// Whether the execution succeeded
    pub success: bool,
    /// Whether any warning was raised
    pub warning: bool,
    /// Accumulated warning messages
    pub warning_messages: Vec<String>,
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            bulk_create_times: Vec::new(),
            created_signals_count: 0,
            created_signals: Vec::new(),
            errors: Vec::new(),
            last_lookback_date: None,
            search_after_times: Vec::new(),
            success: true,
            warning: false,
            warning_messages: Vec::new(),
        }
    }
}

impl ExecutionResult {
    /// Create an empty, successful result
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a well-formed failed result carrying a single error
    pub fn failed(error: impl Into<String>) -> Self {
        let mut result = Self {
            success: false,
            ..Self::default()
        };
        result.push_error(error);
        result
    }

    /// Record the time spent in one search-after query
    pub fn record_search_after(&mut self, duration: Duration) {
        self.search_after_times.push(duration_string(duration));
    }

    /// Record a non-fatal warning
    pub fn push_warning(&mut self, message: impl Into<String>) {
        self.warning = true;
        self.warning_messages.push(message.into());
    }

    /// Record an error message, skipping exact duplicates
    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if !self.errors.contains(&message) {
            self.errors.push(message);
        }
    }

    /// Whether `createdSignalsCount` agrees with the number of created signals
    pub fn is_consistent(&self) -> bool {
        usize::try_from(self.created_signals_count)
            .map(|count| count == self.created_signals.len())
            .unwrap_or(false)
    }

    /// Total time spent in search-after queries, in milliseconds
    pub fn total_search_duration_ms(&self) -> f64 {
        sum_durations(&self.search_after_times)
    }

    /// Total time spent in bulk creates, in milliseconds
    pub fn total_indexing_duration_ms(&self) -> f64 {
        sum_durations(&self.bulk_create_times)
    }

    /// Combine two results.
    ///
    /// Success requires both to succeed, a warning on either side is kept,
    /// counts add up, sequences are concatenated, errors are de-duplicated
    /// and the newer lookback date wins when present.
    #[must_use]
    pub fn merge(mut self, next: ExecutionResult) -> Self {
        self.success = self.success && next.success;
        self.warning = self.warning || next.warning;
        self.search_after_times.extend(next.search_after_times);
        self.bulk_create_times.extend(next.bulk_create_times);
        self.last_lookback_date = next.last_lookback_date.or(self.last_lookback_date);
        self.created_signals_count += next.created_signals_count;
        self.created_signals.extend(next.created_signals);
        self.warning_messages.extend(next.warning_messages);

        let mut seen: HashSet<String> = self.errors.iter().cloned().collect();
        for error in next.errors {
            if seen.insert(error.clone()) {
                self.errors.push(error);
            }
        }

        self
    }

    /// Merge a sequence of results into one, starting from an empty success
    pub fn merge_all<I>(results: I) -> Self
    where
        I: IntoIterator<Item = ExecutionResult>,
    {
        results
            .into_iter()
            .fold(ExecutionResult::new(), ExecutionResult::merge)
    }

    /// Attach carried-over state
    pub fn with_state<S>(self, state: S) -> RuleExecutionOutcome<S> {
        RuleExecutionOutcome {
            result: self,
            state,
        }
    }
}

fn sum_durations(times: &[String]) -> f64 {
    times
        .iter()
        .filter_map(|t| t.parse::<f64>().ok())
        .sum()
}

/// Execution result merged with the state threaded into the next run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleExecutionOutcome<S> {
    /// The execution result
    #[serde(flatten)]
    pub result: ExecutionResult,
    /// State for the next execution of the same rule
    pub state: S,
}

impl<S> RuleExecutionOutcome<S> {
    /// Split into result and state
    pub fn into_parts(self) -> (ExecutionResult, S) {
        (self.result, self.state)
    }

    /// Transform the carried state
    pub fn map_state<T>(self, f: impl FnOnce(S) -> T) -> RuleExecutionOutcome<T> {
        RuleExecutionOutcome {
            result: self.result,
            state: f(self.state),
        }
    }
}
