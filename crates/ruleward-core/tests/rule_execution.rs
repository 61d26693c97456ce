//! End-to-end rule execution through the registry and scheduler

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use ruleward::config::{DetectionConfig, SchedulerConfig};
use ruleward::execution::{
    EqlSequence, ExecutorOptions, MemoryExecutionLog, RuleExecutionStatus, SecurityRuleType,
    SecurityRuleTypeWrapper, WrapperProps,
};
use ruleward::models::{
    AlertKind, CommonRuleParams, CompleteRule, EqlRuleParams, ExecutionResult,
    RuleExecutionOutcome, SearchHit, Threshold, ThresholdRuleParams, ThresholdTerm,
};
use ruleward::persistence::MemoryAlertStore;
use ruleward::scheduler::{RuleScheduler, RuleTypeRegistry};
use ruleward::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn event(id: &str, ts: &str, host: &str, category: &str, outcome: &str) -> SearchHit {
    SearchHit {
        id: id.to_string(),
        index: "logs-endpoint".to_string(),
        source: json!({
            "@timestamp": ts,
            "host": {"name": host},
            "event": {"id": id, "category": category, "outcome": outcome}
        }),
        sort: vec![json!(ts)],
    }
}

fn events() -> Vec<SearchHit> {
    vec![
        event("a-1", "2024-03-01T11:58:00Z", "host-a", "authentication", "failure"),
        event("a-2", "2024-03-01T11:59:00Z", "host-a", "authentication", "failure"),
        event("a-3", "2024-03-01T12:00:00Z", "host-a", "authentication", "failure"),
        event("b-1", "2024-03-01T12:01:00Z", "host-b", "authentication", "failure"),
        event("b-2", "2024-03-01T12:02:00Z", "host-b", "process", "success"),
    ]
}

fn field_value(hit: &SearchHit, field: &str) -> Option<String> {
    hit.source
        .pointer(&format!("/{}", field.replace('.', "/")))
        .and_then(Value::as_str)
        .map(String::from)
}

fn in_window(hits: &[SearchHit], from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&SearchHit> {
    hits.iter()
        .filter(|h| h.timestamp(None).is_some_and(|ts| ts >= from && ts <= to))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ThresholdState {
    signal_history: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct ThresholdContext {
    group: String,
    count: u64,
}

/// Failed authentications per group crossing a count
struct FailedAuthThreshold {
    events: Vec<SearchHit>,
}

#[async_trait]
impl SecurityRuleType for FailedAuthThreshold {
    type Params = ThresholdRuleParams;
    type State = ThresholdState;
    type InstanceContext = ThresholdContext;

    fn name(&self) -> &str {
        "Failed authentication threshold"
    }

    async fn execute(
        &self,
        options: ExecutorOptions<ThresholdRuleParams, ThresholdState, ThresholdContext>,
    ) -> Result<RuleExecutionOutcome<ThresholdState>> {
        let ExecutorOptions {
            params,
            mut state,
            actions,
            run_opts,
            ..
        } = options;
        let tuple = run_opts.tuple;
        let group_field = params.threshold.field.first().cloned().unwrap_or_default();

        let mut result = ExecutionResult::new();
        let start = Instant::now();
        let mut groups: HashMap<String, Vec<&SearchHit>> = HashMap::new();
        for hit in in_window(&self.events, tuple.from, tuple.to) {
            if field_value(hit, "event.outcome").as_deref() != Some("failure") {
                continue;
            }
            if let Some(group) = field_value(hit, &group_field) {
                groups.entry(group).or_default().push(hit);
            }
        }
        result.record_search_after(start.elapsed());

        let mut alerts = Vec::new();
        for (group, hits) in groups {
            let count = hits.len() as u64;
            if count < params.threshold.value || state.signal_history.contains_key(&group) {
                continue;
            }
            let Some(last) = hits.last() else { continue };
            let kind = AlertKind::Threshold {
                terms: vec![ThresholdTerm {
                    field: group_field.clone(),
                    value: group.clone(),
                }],
                count,
                from: tuple.from,
            };
            alerts.extend(run_opts.wrap_hits.wrap_hits(&[(*last).clone()], kind));
            state.signal_history.insert(group.clone(), tuple.to);
            actions.schedule(group.clone(), ThresholdContext { group, count });
        }

        alerts.truncate(run_opts.remaining_signals(&result));
        let response = run_opts.bulk_create.bulk_create(alerts).await?;
        result.add_bulk_create(response)?;
        Ok(result.with_state(state))
    }
}

/// A failed authentication followed by a process start on the same host
struct AuthThenProcess {
    events: Vec<SearchHit>,
}

#[async_trait]
impl SecurityRuleType for AuthThenProcess {
    type Params = EqlRuleParams;
    type State = ();
    type InstanceContext = Value;

    fn name(&self) -> &str {
        "Authentication then process"
    }

    async fn execute(
        &self,
        options: ExecutorOptions<EqlRuleParams, (), Value>,
    ) -> Result<RuleExecutionOutcome<()>> {
        let run_opts = options.run_opts;
        let tuple = run_opts.tuple;

        let mut result = ExecutionResult::new();
        let start = Instant::now();
        let window = in_window(&self.events, tuple.from, tuple.to);
        let mut sequences = Vec::new();
        for (i, first) in window.iter().enumerate() {
            if field_value(first, "event.outcome").as_deref() != Some("failure") {
                continue;
            }
            let host = field_value(first, "host.name");
            let next = window[i + 1..].iter().find(|h| {
                field_value(h, "event.category").as_deref() == Some("process")
                    && field_value(h, "host.name") == host
            });
            if let Some(second) = next {
                sequences.push(EqlSequence {
                    join_keys: vec![json!(host)],
                    events: vec![(*first).clone(), (*second).clone()],
                });
            }
        }
        result.record_search_after(start.elapsed());

        let alerts = run_opts.wrap_sequences.wrap_sequences(&sequences);
        let response = run_opts.bulk_create.bulk_create(alerts).await?;
        result.add_bulk_create(response)?;
        Ok(result.with_state(()))
    }
}

struct Fixture {
    scheduler: RuleScheduler,
    store: Arc<MemoryAlertStore>,
    log: Arc<MemoryExecutionLog>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryAlertStore::new());
    let log = Arc::new(MemoryExecutionLog::new());
    let wrapper = SecurityRuleTypeWrapper::new(WrapperProps {
        config: DetectionConfig::default(),
        persistence: store.clone(),
        execution_logger: log.clone(),
    });

    let mut registry = RuleTypeRegistry::new();
    registry
        .register(Arc::new(wrapper.wrap(FailedAuthThreshold { events: events() })))
        .unwrap();
    registry
        .register(Arc::new(wrapper.wrap(AuthThenProcess { events: events() })))
        .unwrap();

    Fixture {
        scheduler: RuleScheduler::new(Arc::new(registry), SchedulerConfig::default()).unwrap(),
        store,
        log,
    }
}

fn threshold_rule() -> CompleteRule<Value> {
    CompleteRule::new(
        "Brute force",
        ThresholdRuleParams {
            common: CommonRuleParams::new("brute-force", "Repeated failed logins"),
            query: "event.outcome:failure".to_string(),
            threshold: Threshold {
                field: vec!["host.name".to_string()],
                value: 3,
            },
            index: vec!["logs-*".to_string()],
        },
    )
    .erase()
    .unwrap()
}

fn sequence_rule() -> CompleteRule<Value> {
    CompleteRule::new(
        "Login then process",
        EqlRuleParams {
            common: CommonRuleParams::new("login-process", "Failed login followed by a process"),
            query: "sequence by host.name [authentication] [process]".to_string(),
            event_category_override: None,
            index: vec!["logs-*".to_string()],
        },
    )
    .erase()
    .unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 3, 0).unwrap()
}

#[tokio::test]
async fn test_scheduler_runs_threshold_and_sequence_rules() {
    let f = fixture();
    let threshold_id = f
        .scheduler
        .add_rule("siem.thresholdRule", threshold_rule(), Vec::new())
        .unwrap();
    let sequence_id = f
        .scheduler
        .add_rule("siem.eqlRule", sequence_rule(), Vec::new())
        .unwrap();

    let results = f.scheduler.tick(now()).await;
    assert_eq!(results.len(), 2);
    for (_, outcome) in &results {
        assert_eq!(outcome.as_ref().unwrap().status, RuleExecutionStatus::Succeeded);
    }

    let threshold = f.scheduler.runtime(threshold_id).unwrap();
    let report = threshold.last_report.unwrap();
    assert_eq!(report.outcome.result.created_signals_count, 1);
    assert_eq!(report.scheduled_actions.len(), 1);
    assert_eq!(
        report.scheduled_actions[0].context,
        json!({"group": "host-a", "count": 3})
    );
    assert!(threshold.state.unwrap()["signal_history"]
        .get("host-a")
        .is_some());

    let sequence = f.scheduler.runtime(sequence_id).unwrap();
    let report = sequence.last_report.unwrap();
    assert_eq!(report.outcome.result.created_signals_count, 3);
    assert!(report.outcome.result.is_consistent());

    let alerts = f.store.all();
    assert_eq!(alerts.len(), 4);
    let building_blocks = alerts
        .iter()
        .filter(|a| a.source.is_building_block())
        .count();
    assert_eq!(building_blocks, 2);
    let shell = alerts
        .iter()
        .find(|a| matches!(a.source.kind, AlertKind::EqlSequenceShell { .. }))
        .unwrap();
    assert_eq!(shell.source.original_event["host"]["name"], "host-b");

    assert_eq!(
        f.log.last_status(threshold_id).unwrap().status,
        RuleExecutionStatus::Succeeded
    );
    assert_eq!(
        f.log.last_status(sequence_id).unwrap().status,
        RuleExecutionStatus::Succeeded
    );
}

#[tokio::test]
async fn test_late_run_catches_up_without_duplicates() {
    let f = fixture();
    let id = f
        .scheduler
        .add_rule("siem.eqlRule", sequence_rule(), Vec::new())
        .unwrap();

    f.scheduler.run_rule(id, now()).await.unwrap();
    let report = f
        .scheduler
        .run_rule(id, now() + Duration::minutes(22))
        .await
        .unwrap();

    // 16 uncovered minutes, covered by four catch-up windows
    assert_eq!(report.tuples.len(), 5);
    assert_eq!(report.remaining_gap, Duration::zero());
    assert_eq!(report.status, RuleExecutionStatus::Succeeded);
    assert_eq!(report.outcome.result.created_signals_count, 0);
    assert_eq!(f.store.len(), 3);
    assert_eq!(f.scheduler.runtime(id).unwrap().runs, 2);
}

#[tokio::test]
async fn test_result_serializes_with_contract_field_names() {
    let f = fixture();
    let id = f
        .scheduler
        .add_rule("siem.thresholdRule", threshold_rule(), Vec::new())
        .unwrap();

    let report = f.scheduler.run_rule(id, now()).await.unwrap();
    let document = serde_json::to_value(&report.outcome.result).unwrap();

    for key in [
        "bulkCreateTimes",
        "createdSignalsCount",
        "createdSignals",
        "errors",
        "lastLookbackDate",
        "searchAfterTimes",
        "success",
        "warning",
        "warningMessages",
    ] {
        assert!(document.get(key).is_some(), "missing {key}");
    }
    assert_eq!(document["createdSignals"][0]["_index"], ".alerts-security.alerts-default");
    assert_eq!(document["lastLookbackDate"], json!("2024-03-01T11:57:00Z"));

    let parsed: ExecutionResult = serde_json::from_value(document).unwrap();
    assert_eq!(parsed, report.outcome.result);
}

#[tokio::test]
async fn test_invalid_params_are_rejected_at_scheduling() {
    let f = fixture();
    assert!(f
        .scheduler
        .add_rule("siem.thresholdRule", sequence_rule(), Vec::new())
        .is_err());
    assert!(f.scheduler.is_empty());
}
