//! Detection rule definitions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::exception::ExceptionListRef;
use crate::error::Error;

/// Kind of detection rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// KQL/Lucene query rule
    Query,
    /// Query rule backed by a saved query
    SavedQuery,
    /// Threshold aggregation rule
    Threshold,
    /// Event correlation (EQL) rule
    Eql,
    /// Machine learning anomaly rule
    MachineLearning,
    /// Indicator match rule
    ThreatMatch,
}

impl RuleKind {
    /// Identifier the rule type is registered under
    pub fn rule_type_id(self) -> &'static str {
        match self {
            RuleKind::Query => "siem.queryRule",
            RuleKind::SavedQuery => "siem.savedQueryRule",
            RuleKind::Threshold => "siem.thresholdRule",
            RuleKind::Eql => "siem.eqlRule",
            RuleKind::MachineLearning => "siem.mlRule",
            RuleKind::ThreatMatch => "siem.indicatorRule",
        }
    }

    /// Category label shown on alerts
    pub fn category(self) -> &'static str {
        match self {
            RuleKind::Query => "Custom Query Rule",
            RuleKind::SavedQuery => "Saved Query Rule",
            RuleKind::Threshold => "Threshold Rule",
            RuleKind::Eql => "Event Correlation Rule",
            RuleKind::MachineLearning => "Machine Learning Rule",
            RuleKind::ThreatMatch => "Indicator Match Rule",
        }
    }

    /// All known kinds
    pub fn all() -> [RuleKind; 6] {
        [
            RuleKind::Query,
            RuleKind::SavedQuery,
            RuleKind::Threshold,
            RuleKind::Eql,
            RuleKind::MachineLearning,
            RuleKind::ThreatMatch,
        ]
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rule_type_id())
    }
}

impl FromStr for RuleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleKind::all()
            .into_iter()
            .find(|kind| kind.rule_type_id() == s)
            .ok_or_else(|| Error::not_found("rule type", s))
    }
}

/// Rule severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity
    #[default]
    Low,
    /// Medium severity
    Medium,
    /// High severity
    High,
    /// Critical severity
    Critical,
}

/// Parameters shared by every rule kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonRuleParams {
    /// Stable rule identifier chosen by the author
    pub rule_id: String,
    /// Description of what the rule detects
    pub description: String,
    /// Rule authors
    #[serde(default)]
    pub author: Vec<String>,
    /// Marks alerts as building blocks when set
    #[serde(default)]
    pub building_block_type: Option<String>,
    /// Investigation guide
    #[serde(default)]
    pub note: Option<String>,
    /// Known false positives
    #[serde(default)]
    pub false_positives: Vec<String>,
    /// Start of the search window, as date math (e.g. `now-6m`)
    pub from: String,
    /// End of the search window, as date math (e.g. `now`)
    pub to: String,
    /// Whether the rule is a prebuilt, read-only rule
    #[serde(default)]
    pub immutable: bool,
    /// License of prebuilt rules
    #[serde(default)]
    pub license: Option<String>,
    /// Index alerts are written to, if overridden
    #[serde(default)]
    pub output_index: Option<String>,
    /// Timeline template attached to alerts
    #[serde(default)]
    pub timeline_id: Option<String>,
    /// Title of the timeline template
    #[serde(default)]
    pub timeline_title: Option<String>,
    /// Free-form metadata
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
    /// Maximum signals per execution
    pub max_signals: u32,
    /// Risk score (0-100)
    pub risk_score: u8,
    /// Field used to override the rule name on alerts
    #[serde(default)]
    pub rule_name_override: Option<String>,
    /// Severity of generated alerts
    pub severity: Severity,
    /// Field used instead of `@timestamp`
    #[serde(default)]
    pub timestamp_override: Option<String>,
    /// Threat framework mappings
    #[serde(default)]
    pub threat: Vec<serde_json::Value>,
    /// Reference URLs
    #[serde(default)]
    pub references: Vec<String>,
    /// Rule version
    pub version: u32,
    /// Exception lists applied to the rule
    #[serde(default)]
    pub exceptions_list: Vec<ExceptionListRef>,
}

impl CommonRuleParams {
    /// Minimal parameters with the default window (`now-6m` to `now`)
    pub fn new(rule_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            description: description.into(),
            author: Vec::new(),
            building_block_type: None,
            note: None,
            false_positives: Vec::new(),
            from: "now-6m".to_string(),
            to: "now".to_string(),
            immutable: false,
            license: None,
            output_index: None,
            timeline_id: None,
            timeline_title: None,
            meta: None,
            max_signals: 100,
            risk_score: 21,
            rule_name_override: None,
            severity: Severity::Low,
            timestamp_override: None,
            threat: Vec::new(),
            references: Vec::new(),
            version: 1,
            exceptions_list: Vec::new(),
        }
    }

    /// Snapshot of the parameters as stored on alerts (snake_case keys)
    pub fn snapshot(&self) -> RuleParamsSnapshot {
        RuleParamsSnapshot {
            rule_id: self.rule_id.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            building_block_type: self.building_block_type.clone(),
            note: self.note.clone(),
            false_positives: self.false_positives.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            immutable: self.immutable,
            license: self.license.clone(),
            output_index: self.output_index.clone(),
            timeline_id: self.timeline_id.clone(),
            timeline_title: self.timeline_title.clone(),
            meta: self.meta.clone(),
            max_signals: self.max_signals,
            risk_score: self.risk_score,
            rule_name_override: self.rule_name_override.clone(),
            severity: self.severity,
            timestamp_override: self.timestamp_override.clone(),
            threat: self.threat.clone(),
            references: self.references.clone(),
            version: self.version,
            exceptions_list: self.exceptions_list.clone(),
        }
    }
}

/// Rule parameters as persisted on an alert
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuleParamsSnapshot {
    pub rule_id: String,
    pub description: String,
    pub author: Vec<String>,
    pub building_block_type: Option<String>,
    pub note: Option<String>,
    pub false_positives: Vec<String>,
    pub from: String,
    pub to: String,
    pub immutable: bool,
    pub license: Option<String>,
    pub output_index: Option<String>,
    pub timeline_id: Option<String>,
    pub timeline_title: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub max_signals: u32,
    pub risk_score: u8,
    pub rule_name_override: Option<String>,
    pub severity: Severity,
    pub timestamp_override: Option<String>,
    pub threat: Vec<serde_json::Value>,
    pub references: Vec<String>,
    pub version: u32,
    pub exceptions_list: Vec<ExceptionListRef>,
}

/// Behaviour every rule-kind parameter type provides
pub trait RuleParams: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The kind of rule these parameters configure
    const KIND: RuleKind;

    /// Parameters shared by all kinds
    fn common(&self) -> &CommonRuleParams;
}

/// Parameters of a query rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRuleParams {
    #[serde(flatten)]
    #[allow(missing_docs)]
    pub common: CommonRuleParams,
    /// Query text
    pub query: String,
    /// Query language (`kuery` or `lucene`)
    pub language: String,
    /// Source index patterns
    #[serde(default)]
    pub index: Vec<String>,
}

impl RuleParams for QueryRuleParams {
    const KIND: RuleKind = RuleKind::Query;

    fn common(&self) -> &CommonRuleParams {
        &self.common
    }
}

/// Threshold definition of a threshold rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Fields the events are grouped by
    #[serde(default)]
    pub field: Vec<String>,
    /// Minimum number of events per group
    pub value: u64,
}

/// Parameters of a threshold rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRuleParams {
    #[serde(flatten)]
    #[allow(missing_docs)]
    pub common: CommonRuleParams,
    /// Query selecting candidate events
    pub query: String,
    /// Grouping and count threshold
    pub threshold: Threshold,
    /// Source index patterns
    #[serde(default)]
    pub index: Vec<String>,
}

impl RuleParams for ThresholdRuleParams {
    const KIND: RuleKind = RuleKind::Threshold;

    fn common(&self) -> &CommonRuleParams {
        &self.common
    }
}

/// Parameters of an event correlation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EqlRuleParams {
    #[serde(flatten)]
    #[allow(missing_docs)]
    pub common: CommonRuleParams,
    /// EQL query
    pub query: String,
    /// Field overriding `event.category`
    #[serde(default)]
    pub event_category_override: Option<String>,
    /// Source index patterns
    #[serde(default)]
    pub index: Vec<String>,
}

impl RuleParams for EqlRuleParams {
    const KIND: RuleKind = RuleKind::Eql;

    fn common(&self) -> &CommonRuleParams {
        &self.common
    }
}

/// Parameters of a machine learning rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineLearningRuleParams {
    #[serde(flatten)]
    #[allow(missing_docs)]
    pub common: CommonRuleParams,
    /// Minimum anomaly score that produces an alert
    pub anomaly_threshold: u32,
    /// Jobs whose anomalies are considered
    pub machine_learning_job_id: Vec<String>,
}

impl RuleParams for MachineLearningRuleParams {
    const KIND: RuleKind = RuleKind::MachineLearning;

    fn common(&self) -> &CommonRuleParams {
        &self.common
    }
}

/// Scheduling and bookkeeping attributes of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// Human-readable name
    pub name: String,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Run interval (e.g. `5m`)
    pub interval: String,
    /// Whether the rule is enabled
    pub enabled: bool,
    /// When the rule was created
    pub created_at: DateTime<Utc>,
    /// When the rule was last updated
    pub updated_at: DateTime<Utc>,
    /// Who created the rule
    #[serde(default)]
    pub created_by: Option<String>,
    /// Who last updated the rule
    #[serde(default)]
    pub updated_by: Option<String>,
    /// Action throttle
    #[serde(default)]
    pub throttle: Option<String>,
}

/// A rule with its identity, parameters and configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRule<P> {
    /// Saved object id of the rule
    pub alert_id: Uuid,
    /// Kind specific parameters
    pub rule_params: P,
    /// Scheduling attributes
    pub rule_config: RuleConfig,
}

impl<P> CompleteRule<P> {
    /// Create an enabled rule running every five minutes
    pub fn new(name: impl Into<String>, rule_params: P) -> Self {
        let now = Utc::now();
        Self {
            alert_id: Uuid::new_v4(),
            rule_params,
            rule_config: RuleConfig {
                name: name.into(),
                tags: Vec::new(),
                interval: "5m".to_string(),
                enabled: true,
                created_at: now,
                updated_at: now,
                created_by: None,
                updated_by: None,
                throttle: None,
            },
        }
    }

    /// Set the run interval
    #[must_use]
    pub fn with_interval(mut self, interval: impl Into<String>) -> Self {
        self.rule_config.interval = interval.into();
        self
    }
}

impl<P: RuleParams> CompleteRule<P> {
    /// The kind of this rule
    pub fn kind(&self) -> RuleKind {
        P::KIND
    }

    /// Parameters shared by all kinds
    pub fn common(&self) -> &CommonRuleParams {
        self.rule_params.common()
    }

    /// The same rule with its parameters as JSON
    pub fn erase(self) -> Result<CompleteRule<serde_json::Value>, Error> {
        Ok(CompleteRule {
            alert_id: self.alert_id,
            rule_params: serde_json::to_value(&self.rule_params)?,
            rule_config: self.rule_config,
        })
    }
}
