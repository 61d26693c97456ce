//! # Ruleward
//!
//! Execution contract and runtime for security detection rules.
//!
//! A rule kind implements [`SecurityRuleType`](execution::SecurityRuleType)
//! once. The [`SecurityRuleTypeWrapper`](execution::SecurityRuleTypeWrapper)
//! turns it into something a scheduler can run: it computes the search
//! windows of each cycle, hands the executor its bulk create and wrapping
//! callbacks, merges per-window results and records the execution status.
//!
//! ## Architecture
//!
//! - **Models**: rules, exception lists, alerts, execution tuples and results
//! - **Execution**: the executor contract, range tuples, bulk create,
//!   alert wrapping, status logging and the wrapper
//! - **Persistence**: where wrapped alerts are written
//! - **Scheduler**: type-erased registry and an interval scheduler
//!
//! ## Quick Start
//!
//! ```bash
//! # Search windows for a rule that last ran 20 minutes ago
//! ruleward tuples --from now-6m --interval 5m --previous 20m
//!
//! # Validate an execution result document
//! ruleward check-result result.json
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::execution::{
        ExecutorOptions, RunOpts, SecurityRuleType, SecurityRuleTypeWrapper, WrapperProps,
    };
    pub use crate::models::*;
    pub use crate::persistence::{MemoryAlertStore, PersistenceService};
    pub use crate::scheduler::{RuleScheduler, RuleTypeRegistry};
}
