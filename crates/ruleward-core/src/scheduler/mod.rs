//! Rule type registry and scheduler
//!
//! The registry erases the parameter and state types of wrapped rule types
//! so rules of every kind can be driven by one scheduler.

mod registry;
mod runner;

pub use registry::{ErasedCycleReport, ErasedRuleType, ErasedRunRequest, RuleTypeRegistry};
pub use runner::{RuleRuntime, RuleScheduler, ScheduledRule};
