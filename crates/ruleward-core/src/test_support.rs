//! Fixtures shared by unit tests

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::DetectionConfig;
use crate::error::{Error, Result};
use crate::execution::{
    AlertFactory, ExecutorOptions, MemoryExecutionLog, SecurityRuleType, SecurityRuleTypeWrapper,
    WrapHits, WrapperProps,
};
use crate::models::{
    has_large_value_item, AlertKind, CommonRuleParams, CompleteRule, ExceptionListItem,
    ExecutionResult, QueryRuleParams, RuleExecutionOutcome, SearchHit, WrappedAlert,
};
use crate::persistence::MemoryAlertStore;

pub const SIGNALS_INDEX: &str = ".alerts-security.alerts-default";

pub fn query_params(query: &str) -> QueryRuleParams {
    QueryRuleParams {
        common: CommonRuleParams::new("rule-1", "Detects failed logins"),
        query: query.to_string(),
        language: "kuery".to_string(),
        index: vec!["logs-*".to_string()],
    }
}

pub fn query_rule() -> CompleteRule<QueryRuleParams> {
    CompleteRule::new("Failed logins", query_params("event.outcome:failure"))
}

pub fn hit(id: &str) -> SearchHit {
    hit_at(id, "2024-03-01T12:00:00Z", "failure")
}

pub fn hit_at(id: &str, timestamp: &str, outcome: &str) -> SearchHit {
    SearchHit {
        id: id.to_string(),
        index: "logs-auth".to_string(),
        source: json!({
            "@timestamp": timestamp,
            "event": {"id": id, "outcome": outcome},
            "host": {"name": "host-a"}
        }),
        sort: vec![json!(timestamp)],
    }
}

pub fn sample_alert(event_id: &str) -> WrappedAlert {
    AlertFactory::new(&query_rule(), SIGNALS_INDEX, "default")
        .wrap_hits(&[hit(event_id)], AlertKind::Query)
        .remove(0)
}

pub fn value_list_exception() -> ExceptionListItem {
    serde_json::from_value(json!({
        "id": "exc-1",
        "item_id": "blocked-ips",
        "list_id": "endpoint_list",
        "name": "Blocked addresses",
        "created_at": "2024-03-01T00:00:00Z",
        "created_by": "elastic",
        "entries": [
            {"type": "list", "field": "source.ip", "operator": "included",
             "list": {"id": "blocked-ips", "type": "ip"}}
        ]
    }))
    .unwrap()
}

/// State of [`EventMatchRule`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMatchState {
    pub executions: u32,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Action context of [`EventMatchRule`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertCountContext {
    pub count: u64,
}

/// Query rule over a fixed set of events; the query is `field:value`.
/// `fail` makes the executor error out and `reject` returns an unsuccessful result.
pub struct EventMatchRule {
    pub events: Vec<SearchHit>,
}

impl EventMatchRule {
    fn matches(query: &str, hit: &SearchHit) -> bool {
        let Some((field, value)) = query.split_once(':') else {
            return false;
        };
        let pointer = format!("/{}", field.replace('.', "/"));
        hit.source.pointer(&pointer).and_then(|v| v.as_str()) == Some(value)
    }
}

#[async_trait]
impl SecurityRuleType for EventMatchRule {
    type Params = QueryRuleParams;
    type State = EventMatchState;
    type InstanceContext = AlertCountContext;

    fn name(&self) -> &str {
        "Event match"
    }

    async fn execute(
        &self,
        options: ExecutorOptions<QueryRuleParams, EventMatchState, AlertCountContext>,
    ) -> Result<RuleExecutionOutcome<EventMatchState>> {
        let ExecutorOptions {
            params,
            mut state,
            actions,
            run_opts,
            ..
        } = options;

        if params.query == "fail" {
            return Err(Error::internal("search phase execution failed"));
        }

        let mut result = if params.query == "reject" {
            ExecutionResult::failed("version conflict")
        } else {
            ExecutionResult::new()
        };
        if has_large_value_item(&run_opts.exception_items) {
            result.push_warning(
                run_opts
                    .build_rule_message
                    .build(&["Exceptions that use value lists are not applied"]),
            );
        }

        let start = Instant::now();
        let matched: Vec<SearchHit> = self
            .events
            .iter()
            .filter(|h| h.timestamp(None).is_some_and(|ts| run_opts.tuple.contains(ts)))
            .filter(|h| Self::matches(&params.query, h))
            .take(run_opts.remaining_signals(&result))
            .cloned()
            .collect();
        result.record_search_after(start.elapsed());

        state.executions += 1;
        state.last_event_at = matched
            .iter()
            .filter_map(|h| h.timestamp(None))
            .max()
            .or(state.last_event_at);

        let alerts = run_opts.wrap_hits.wrap_hits(&matched, AlertKind::Query);
        let response = run_opts.bulk_create.bulk_create(alerts).await?;
        let created = response.created_items_count;
        result.add_bulk_create(response)?;

        if created > 0 {
            actions.schedule(
                run_opts.complete_rule.alert_id.to_string(),
                AlertCountContext { count: created },
            );
        }

        Ok(result.with_state(state))
    }
}

pub struct Harness {
    pub store: Arc<MemoryAlertStore>,
    pub log: Arc<MemoryExecutionLog>,
    pub wrapper: SecurityRuleTypeWrapper,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryAlertStore::new());
    let log = Arc::new(MemoryExecutionLog::new());
    let wrapper = SecurityRuleTypeWrapper::new(WrapperProps {
        config: DetectionConfig::default(),
        persistence: store.clone(),
        execution_logger: log.clone(),
    });
    Harness {
        store,
        log,
        wrapper,
    }
}
