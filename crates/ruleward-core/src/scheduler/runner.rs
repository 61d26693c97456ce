//! Interval scheduler driving registered rule types

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::registry::{ErasedCycleReport, ErasedRunRequest, RuleTypeRegistry};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::execution::parse_interval;
use crate::models::{CompleteRule, ExceptionListItem};

/// A rule known to the scheduler
#[derive(Debug, Clone)]
pub struct ScheduledRule {
    /// Rule type the rule runs as
    pub rule_type_id: String,
    /// The rule
    pub complete_rule: CompleteRule<Value>,
    /// Parsed run interval
    pub interval: Duration,
    /// Exception items applied to the rule
    pub exception_items: Vec<ExceptionListItem>,
}

/// Bookkeeping carried between cycles of one rule
#[derive(Debug, Clone, Default)]
pub struct RuleRuntime {
    /// Start of the most recent cycle
    pub previous_started_at: Option<DateTime<Utc>>,
    /// State returned by the most recent cycle
    pub state: Option<Value>,
    /// Report of the most recent cycle
    pub last_report: Option<ErasedCycleReport>,
    /// Number of cycles run
    pub runs: u64,
}

/// Runs due rules on a fixed tick
pub struct RuleScheduler {
    registry: Arc<RuleTypeRegistry>,
    config: SchedulerConfig,
    rules: DashMap<Uuid, ScheduledRule>,
    runtime: DashMap<Uuid, RuleRuntime>,
}

impl RuleScheduler {
    /// Create a scheduler over a registry. Fails on a zero tick interval
    /// or a zero concurrency limit.
    pub fn new(registry: Arc<RuleTypeRegistry>, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            rules: DashMap::new(),
            runtime: DashMap::new(),
        })
    }

    /// Add or replace a rule, keeping the runtime of a replaced rule
    pub fn add_rule(
        &self,
        rule_type_id: &str,
        complete_rule: CompleteRule<Value>,
        exception_items: Vec<ExceptionListItem>,
    ) -> Result<Uuid> {
        let rule_type = self.registry.get(rule_type_id)?;
        rule_type.validate_params(&complete_rule.rule_params)?;
        let interval = parse_interval(&complete_rule.rule_config.interval)?;
        if interval <= Duration::zero() {
            return Err(Error::validation("rule interval must be positive"));
        }

        let id = complete_rule.alert_id;
        debug!(rule_id = %id, rule_type = rule_type_id, "Scheduling rule");
        self.rules.insert(
            id,
            ScheduledRule {
                rule_type_id: rule_type_id.to_string(),
                complete_rule,
                interval,
                exception_items,
            },
        );
        self.runtime.entry(id).or_default();
        Ok(id)
    }

    /// Remove a rule and its runtime
    pub fn remove_rule(&self, id: Uuid) -> Option<ScheduledRule> {
        self.runtime.remove(&id);
        self.rules.remove(&id).map(|(_, rule)| rule)
    }

    /// Number of scheduled rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are scheduled
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runtime of a rule
    pub fn runtime(&self, id: Uuid) -> Option<RuleRuntime> {
        self.runtime.get(&id).map(|r| r.clone())
    }

    /// Enabled rules whose interval has elapsed at `now`
    pub fn due_rules(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut due: Vec<Uuid> = self
            .rules
            .iter()
            .filter(|entry| entry.complete_rule.rule_config.enabled)
            .filter(|entry| {
                let previous = self
                    .runtime
                    .get(entry.key())
                    .and_then(|r| r.previous_started_at);
                previous.map_or(true, |p| {
                    p.checked_add_signed(entry.interval)
                        .is_some_and(|next| next <= now)
                })
            })
            .map(|entry| *entry.key())
            .collect();
        due.sort();
        due
    }

    /// Run one cycle of a rule now, regardless of its interval
    pub async fn run_rule(&self, id: Uuid, now: DateTime<Utc>) -> Result<ErasedCycleReport> {
        let rule = self
            .rules
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::not_found("rule", id.to_string()))?;
        let runtime = self.runtime(id).unwrap_or_default();
        let rule_type = self.registry.get(&rule.rule_type_id)?;

        let report = rule_type
            .run_erased(ErasedRunRequest {
                complete_rule: rule.complete_rule,
                state: runtime.state,
                previous_started_at: runtime.previous_started_at,
                started_at: now,
                exception_items: rule.exception_items,
            })
            .await?;

        if let Some(mut entry) = self.runtime.get_mut(&id) {
            entry.previous_started_at = Some(now);
            entry.state = Some(report.outcome.state.clone());
            entry.last_report = Some(report.clone());
            entry.runs += 1;
        }

        Ok(report)
    }

    /// Run every due rule, at most `max_concurrent_rules` at a time
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<(Uuid, Result<ErasedCycleReport>)> {
        let due = self.due_rules(now);
        if due.is_empty() {
            return Vec::new();
        }
        debug!(count = due.len(), "Running due rules");

        stream::iter(due)
            .map(|id| async move { (id, self.run_rule(id, now).await) })
            .buffer_unordered(self.config.max_concurrent_rules)
            .collect()
            .await
    }

    /// Tick until `shutdown` flips to `true`
    pub async fn start(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            rules = self.len(),
            tick = ?self.config.tick_interval,
            "Starting rule scheduler"
        );

        let mut ticker = interval(self.config.tick_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for (id, outcome) in self.tick(Utc::now()).await {
                        match outcome {
                            Ok(report) if report.is_failure() => {
                                warn!(rule_id = %id, errors = ?report.outcome.result.errors, "Rule cycle failed");
                            }
                            Ok(report) => {
                                debug!(
                                    rule_id = %id,
                                    created = report.outcome.result.created_signals_count,
                                    "Rule cycle finished"
                                );
                            }
                            Err(e) => error!(rule_id = %id, error = %e, "Error running rule"),
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Rule scheduler stopped");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, hit, query_params, query_rule, EventMatchRule, Harness};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 3, 0).unwrap()
    }

    fn scheduler() -> (RuleScheduler, Harness) {
        let h = harness();
        let mut registry = RuleTypeRegistry::new();
        registry
            .register(Arc::new(h.wrapper.wrap(EventMatchRule {
                events: vec![hit("evt-1")],
            })))
            .unwrap();
        (
            RuleScheduler::new(Arc::new(registry), SchedulerConfig::default()).unwrap(),
            h,
        )
    }

    fn erased_rule() -> CompleteRule<Value> {
        query_rule().erase().unwrap()
    }

    #[test]
    fn test_add_rule_validates() {
        let (scheduler, _) = scheduler();

        assert!(scheduler
            .add_rule("siem.eqlRule", erased_rule(), Vec::new())
            .is_err());

        let bad_interval = erased_rule().with_interval("soon");
        assert!(scheduler
            .add_rule("siem.queryRule", bad_interval, Vec::new())
            .is_err());

        let id = scheduler
            .add_rule("siem.queryRule", erased_rule(), Vec::new())
            .unwrap();
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.runtime(id).unwrap().runs, 0);
    }

    #[tokio::test]
    async fn test_due_rules_follow_interval() {
        let (scheduler, _) = scheduler();
        let id = scheduler
            .add_rule("siem.queryRule", erased_rule(), Vec::new())
            .unwrap();

        let mut disabled = erased_rule();
        disabled.rule_config.enabled = false;
        scheduler
            .add_rule("siem.queryRule", disabled, Vec::new())
            .unwrap();

        assert_eq!(scheduler.due_rules(now()), vec![id]);

        scheduler.run_rule(id, now()).await.unwrap();
        assert!(scheduler.due_rules(now() + Duration::minutes(4)).is_empty());
        assert_eq!(scheduler.due_rules(now() + Duration::minutes(5)), vec![id]);
    }

    #[tokio::test]
    async fn test_tick_updates_runtime() {
        let (scheduler, h) = scheduler();
        let id = scheduler
            .add_rule("siem.queryRule", erased_rule(), Vec::new())
            .unwrap();

        let results = scheduler.tick(now()).await;
        assert_eq!(results.len(), 1);
        let report = results[0].1.as_ref().unwrap();
        assert_eq!(report.outcome.result.created_signals_count, 1);
        assert_eq!(h.store.len(), 1);

        let runtime = scheduler.runtime(id).unwrap();
        assert_eq!(runtime.runs, 1);
        assert_eq!(runtime.previous_started_at, Some(now()));
        assert_eq!(runtime.state.unwrap()["executions"], 1);

        // not due again yet
        assert!(scheduler.tick(now() + Duration::minutes(1)).await.is_empty());

        let later = now() + Duration::minutes(5);
        let results = scheduler.tick(later).await;
        let report = results[0].1.as_ref().unwrap();
        assert_eq!(report.status, crate::execution::RuleExecutionStatus::Succeeded);
        assert_eq!(scheduler.runtime(id).unwrap().runs, 2);
    }

    #[tokio::test]
    async fn test_run_rule_unknown_id() {
        let (scheduler, _) = scheduler();
        assert!(matches!(
            scheduler.run_rule(Uuid::new_v4(), now()).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_rule() {
        let (scheduler, _) = scheduler();
        let rule = CompleteRule::new("Other", query_params("host.name:host-a"))
            .erase()
            .unwrap();
        let id = scheduler.add_rule("siem.queryRule", rule, Vec::new()).unwrap();

        assert!(scheduler.remove_rule(id).is_some());
        assert!(scheduler.is_empty());
        assert!(scheduler.runtime(id).is_none());
    }

    #[tokio::test]
    async fn test_start_stops_on_shutdown() {
        let (scheduler, _) = scheduler();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.start(rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_new_rejects_config_that_cannot_tick() {
        let registry = Arc::new(RuleTypeRegistry::new());

        let no_tick = SchedulerConfig {
            tick_interval: std::time::Duration::ZERO,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            RuleScheduler::new(Arc::clone(&registry), no_tick),
            Err(Error::Config(_))
        ));

        let no_workers = SchedulerConfig {
            max_concurrent_rules: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            RuleScheduler::new(registry, no_workers),
            Err(Error::Config(_))
        ));
    }
}
