//! Alert (signal) data models

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule::{RuleParamsSnapshot, Severity};
use crate::error::Result;

/// Render a timestamp the way alerts store it
pub fn normalize_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lifecycle status of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Condition is still present
    #[default]
    Active,
    /// Condition has recovered
    Recovered,
}

/// Triage state of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Not yet looked at
    #[default]
    Open,
    /// Being investigated
    Acknowledged,
    /// Triaged
    Closed,
}

/// What an ancestor of an alert is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AncestorType {
    /// A source event
    Event,
    /// Another alert
    Signal,
}

/// A document an alert was derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ancestor {
    /// Document id
    pub id: String,
    /// Document index
    pub index: String,
    /// Depth of the document in the alert chain
    pub depth: u32,
    /// Rule that produced the document, when it is an alert
    pub rule: Option<String>,
    /// Kind of document
    #[serde(rename = "type")]
    pub ancestor_type: AncestorType,
}

/// Fields every alert carries regardless of rule kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalFields {
    /// When the alert was created
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    /// Alert id
    pub uuid: String,
    /// Lifecycle status
    pub status: AlertStatus,
    /// Triage state
    pub workflow_status: WorkflowStatus,
    /// Spaces the alert is visible in
    pub space_ids: Vec<String>,
    /// Timestamp of the source event
    pub original_time: Option<String>,
    /// Number of alerts between this alert and the source events
    pub depth: u32,
    /// Human-readable reason
    pub reason: Option<String>,
    /// Documents the alert derives from
    pub ancestors: Vec<Ancestor>,
}

/// Rule attributes copied onto each alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    /// Saved object id of the rule
    pub uuid: Uuid,
    /// Author-assigned rule id
    pub rule_id: String,
    /// Rule name
    pub name: String,
    /// Registered rule type id
    pub rule_type_id: String,
    /// Rule category label
    pub category: String,
    /// Producing application
    pub producer: String,
    /// Consuming application
    pub consumer: String,
    /// Severity
    pub severity: Severity,
    /// Risk score
    pub risk_score: u8,
    /// Tags
    pub tags: Vec<String>,
    /// Run interval
    pub interval: String,
    /// Rule version
    pub version: u32,
    /// Building block marker
    pub building_block_type: Option<String>,
}

/// Field and value of one threshold grouping term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdTerm {
    /// Grouping field
    pub field: String,
    /// Group value
    pub value: String,
}

/// Kind-specific part of an alert
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertKind {
    /// Single event matched a query
    Query,
    /// A group of events crossed a count threshold
    Threshold {
        terms: Vec<ThresholdTerm>,
        count: u64,
        from: DateTime<Utc>,
    },
    /// One event of an EQL sequence
    EqlBuildingBlock { group_id: String, group_index: usize },
    /// The alert representing a whole EQL sequence
    EqlSequenceShell {
        group_id: String,
        building_block_ids: Vec<String>,
    },
    /// A machine learning anomaly
    MachineLearning { job_id: String, anomaly_score: f64 },
}

/// A detection alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(flatten)]
    #[allow(missing_docs)]
    pub technical: TechnicalFields,
    /// Rule that produced the alert
    pub rule: RuleSnapshot,
    /// Rule parameters at the time of detection
    pub parameters: RuleParamsSnapshot,
    /// Kind specific fields
    pub kind: AlertKind,
    /// Source event fields (empty object for shell alerts)
    pub original_event: serde_json::Value,
}

impl Alert {
    /// Whether the alert is a building block of another alert
    pub fn is_building_block(&self) -> bool {
        matches!(self.kind, AlertKind::EqlBuildingBlock { .. })
            || self.rule.building_block_type.is_some()
    }
}

/// A raw search hit produced by a rule query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document id
    #[serde(rename = "_id")]
    pub id: String,
    /// Document index
    #[serde(rename = "_index")]
    pub index: String,
    /// Document body
    #[serde(rename = "_source", default)]
    pub source: serde_json::Value,
    /// Sort values used as search-after cursor
    #[serde(default)]
    pub sort: Vec<serde_json::Value>,
}

impl SearchHit {
    /// Event timestamp read from `@timestamp` (or an override field)
    pub fn timestamp(&self, field: Option<&str>) -> Option<DateTime<Utc>> {
        let field = field.unwrap_or("@timestamp");
        self.source
            .get(field)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// An alert ready for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedAlert {
    /// Alert id
    #[serde(rename = "_id")]
    pub id: String,
    /// Target index
    #[serde(rename = "_index")]
    pub index: String,
    /// The alert
    #[serde(rename = "_source")]
    pub source: Alert,
}

impl WrappedAlert {
    /// Flattened JSON form used in execution results
    pub fn to_created_signal(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(&self.source)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("_id".to_string(), serde_json::Value::String(self.id.clone()));
            map.insert(
                "_index".to_string(),
                serde_json::Value::String(self.index.clone()),
            );
        }
        Ok(value)
    }
}
