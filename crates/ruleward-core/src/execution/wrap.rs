//! Turning search hits and EQL sequences into alerts

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::models::{
    normalize_timestamp, Alert, AlertKind, AlertStatus, Ancestor, AncestorType, CompleteRule,
    RuleParams, RuleParamsSnapshot, RuleSnapshot, SearchHit, TechnicalFields, WorkflowStatus,
    WrappedAlert,
};

/// Converts raw hits into alerts for the running rule
pub trait WrapHits: Send + Sync {
    /// Build one alert per hit. Alerts whose lineage already contains the
    /// running rule, and duplicates within the batch, are dropped.
    fn wrap_hits(&self, hits: &[SearchHit], kind: AlertKind) -> Vec<WrappedAlert>;
}

/// Converts EQL sequences into building-block alerts plus a shell alert
pub trait WrapSequences: Send + Sync {
    /// Wrap every sequence; each yields its building blocks followed by its shell
    fn wrap_sequences(&self, sequences: &[EqlSequence]) -> Vec<WrappedAlert>;
}

/// Events matched together by an EQL sequence query
#[derive(Debug, Clone, PartialEq)]
pub struct EqlSequence {
    /// Values of the sequence join keys
    pub join_keys: Vec<Value>,
    /// Matched events, in sequence order
    pub events: Vec<SearchHit>,
}

/// Deterministic alert id: hex SHA-256 of the parts
pub fn generate_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Builds alerts for one rule; implements both wrapping callbacks
#[derive(Debug, Clone)]
pub struct AlertFactory {
    rule: RuleSnapshot,
    parameters: RuleParamsSnapshot,
    signals_index: String,
    space_id: String,
    timestamp_override: Option<String>,
}

impl AlertFactory {
    /// Create a factory for a rule writing to `signals_index`
    pub fn new<P: RuleParams>(
        complete_rule: &CompleteRule<P>,
        signals_index: impl Into<String>,
        space_id: impl Into<String>,
    ) -> Self {
        let common = complete_rule.common();
        let kind = complete_rule.kind();
        let config = &complete_rule.rule_config;

        let rule = RuleSnapshot {
            uuid: complete_rule.alert_id,
            rule_id: common.rule_id.clone(),
            name: config.name.clone(),
            rule_type_id: kind.rule_type_id().to_string(),
            category: kind.category().to_string(),
            producer: "siem".to_string(),
            consumer: "siem".to_string(),
            severity: common.severity,
            risk_score: common.risk_score,
            tags: config.tags.clone(),
            interval: config.interval.clone(),
            version: common.version,
            building_block_type: common.building_block_type.clone(),
        };

        Self {
            rule,
            parameters: common.snapshot(),
            signals_index: signals_index.into(),
            space_id: space_id.into(),
            timestamp_override: common.timestamp_override.clone(),
        }
    }

    /// Index the alerts are written to
    pub fn signals_index(&self) -> &str {
        &self.signals_index
    }

    fn rule_uuid(&self) -> String {
        self.rule.uuid.to_string()
    }

    fn lineage(hit: &SearchHit) -> (Vec<Ancestor>, u32) {
        let parent_depth = hit
            .source
            .get("depth")
            .and_then(Value::as_u64)
            .and_then(|d| u32::try_from(d).ok());

        match parent_depth {
            Some(depth) => {
                let mut ancestors: Vec<Ancestor> = hit
                    .source
                    .get("ancestors")
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default();
                ancestors.push(Ancestor {
                    id: hit.id.clone(),
                    index: hit.index.clone(),
                    depth,
                    rule: hit
                        .source
                        .pointer("/rule/uuid")
                        .and_then(Value::as_str)
                        .map(String::from),
                    ancestor_type: AncestorType::Signal,
                });
                (ancestors, depth + 1)
            }
            None => (
                vec![Ancestor {
                    id: hit.id.clone(),
                    index: hit.index.clone(),
                    depth: 0,
                    rule: None,
                    ancestor_type: AncestorType::Event,
                }],
                1,
            ),
        }
    }

    fn reason(&self) -> String {
        format!(
            "event created {} alert {}.",
            serde_json::to_value(self.rule.severity)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default(),
            self.rule.name
        )
    }

    fn build(
        &self,
        id: String,
        kind: AlertKind,
        original_event: Value,
        original_time: Option<String>,
        ancestors: Vec<Ancestor>,
        depth: u32,
    ) -> WrappedAlert {
        WrappedAlert {
            id: id.clone(),
            index: self.signals_index.clone(),
            source: Alert {
                technical: TechnicalFields {
                    timestamp: normalize_timestamp(Utc::now()),
                    uuid: id,
                    status: AlertStatus::Active,
                    workflow_status: WorkflowStatus::Open,
                    space_ids: vec![self.space_id.clone()],
                    original_time,
                    depth,
                    reason: Some(self.reason()),
                    ancestors,
                },
                rule: self.rule.clone(),
                parameters: self.parameters.clone(),
                kind,
                original_event,
            },
        }
    }

    fn wrap_hit(&self, hit: &SearchHit, id: String, kind: AlertKind) -> WrappedAlert {
        let (ancestors, depth) = Self::lineage(hit);
        let original_time = hit
            .timestamp(self.timestamp_override.as_deref())
            .or_else(|| hit.timestamp(None))
            .map(normalize_timestamp);
        self.build(id, kind, hit.source.clone(), original_time, ancestors, depth)
    }
}

/// Whether the rule already appears in the alert's lineage
fn descends_from(alert: &WrappedAlert, rule_uuid: &str) -> bool {
    alert
        .source
        .technical
        .ancestors
        .iter()
        .any(|ancestor| ancestor.rule.as_deref() == Some(rule_uuid))
}

impl WrapHits for AlertFactory {
    fn wrap_hits(&self, hits: &[SearchHit], kind: AlertKind) -> Vec<WrappedAlert> {
        let rule_uuid = self.rule_uuid();
        let mut seen = HashSet::new();

        hits.iter()
            .filter_map(|hit| {
                let id = generate_id(&[&hit.index, &hit.id, &rule_uuid]);
                seen.insert(id.clone())
                    .then(|| self.wrap_hit(hit, id, kind.clone()))
            })
            .filter(|alert| !descends_from(alert, &rule_uuid))
            .collect()
    }
}

impl WrapSequences for AlertFactory {
    fn wrap_sequences(&self, sequences: &[EqlSequence]) -> Vec<WrappedAlert> {
        let rule_uuid = self.rule_uuid();
        let mut wrapped = Vec::new();

        for sequence in sequences {
            if sequence.events.is_empty() {
                continue;
            }

            let event_ids: Vec<String> = sequence
                .events
                .iter()
                .map(|hit| generate_id(&[&hit.index, &hit.id, &rule_uuid]))
                .collect();
            let joined: Vec<&str> = event_ids.iter().map(String::as_str).collect();
            let group_id = generate_id(&joined);

            let building_blocks: Vec<WrappedAlert> = sequence
                .events
                .iter()
                .zip(&event_ids)
                .enumerate()
                .map(|(group_index, (hit, event_id))| {
                    let id = generate_id(&[&group_id, event_id]);
                    self.wrap_hit(
                        hit,
                        id,
                        AlertKind::EqlBuildingBlock {
                            group_id: group_id.clone(),
                            group_index,
                        },
                    )
                })
                .collect();

            if building_blocks
                .iter()
                .any(|bb| descends_from(bb, &rule_uuid))
            {
                continue;
            }

            let sources: Vec<Value> = sequence.events.iter().map(|h| h.source.clone()).collect();
            let ancestors: Vec<Ancestor> = building_blocks
                .iter()
                .flat_map(|bb| bb.source.technical.ancestors.clone())
                .collect();
            let depth = building_blocks
                .iter()
                .map(|bb| bb.source.technical.depth)
                .max()
                .unwrap_or(1);
            let original_time = building_blocks
                .first()
                .and_then(|bb| bb.source.technical.original_time.clone());

            let shell = self.build(
                generate_id(&[&group_id, &rule_uuid]),
                AlertKind::EqlSequenceShell {
                    group_id,
                    building_block_ids: building_blocks.iter().map(|bb| bb.id.clone()).collect(),
                },
                common_fields(&sources),
                original_time,
                ancestors,
                depth,
            );

            wrapped.extend(building_blocks);
            wrapped.push(shell);
        }

        wrapped
    }
}

/// Fields with identical values across all documents
fn common_fields(docs: &[Value]) -> Value {
    let Some((first, rest)) = docs.split_first() else {
        return Value::Object(Map::new());
    };
    rest.iter()
        .fold(Some(first.clone()), |acc, doc| acc.and_then(|a| intersect(&a, doc)))
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn intersect(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            let merged: Map<String, Value> = left
                .iter()
                .filter_map(|(key, lv)| {
                    right
                        .get(key)
                        .and_then(|rv| intersect(lv, rv))
                        .map(|v| (key.clone(), v))
                })
                .collect();
            (!merged.is_empty()).then_some(Value::Object(merged))
        }
        _ => (a == b).then(|| a.clone()),
    }
}
