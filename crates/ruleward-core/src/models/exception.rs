//! Exception list data carried into rule executions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an exception list is scoped to one space or shared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// Visible in a single space
    #[default]
    Single,
    /// Shared across spaces
    Agnostic,
}

/// Kind of exception list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionListType {
    /// Generic detection exceptions
    Detection,
    /// Endpoint exceptions
    Endpoint,
    /// Exceptions created from a rule
    RuleDefault,
}

/// Reference from a rule to an exception list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionListRef {
    /// Saved object id of the list
    pub id: String,
    /// Human-assigned list id
    pub list_id: String,
    /// Kind of list
    #[serde(rename = "type")]
    pub list_type: ExceptionListType,
    /// Namespace of the list
    pub namespace_type: NamespaceType,
}

/// Whether an entry includes or excludes matching events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryOperator {
    /// Matching events are excepted
    #[default]
    Included,
    /// Non-matching events are excepted
    Excluded,
}

/// Reference to a value list used by `list` entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueListRef {
    /// Value list id
    pub id: String,
    /// Value type of the list (e.g. `ip`, `keyword`)
    #[serde(rename = "type")]
    pub value_type: String,
}

/// A single condition of an exception item
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExceptionEntry {
    /// Field equals a value
    Match {
        field: String,
        operator: EntryOperator,
        value: String,
    },
    /// Field equals any of the values
    MatchAny {
        field: String,
        operator: EntryOperator,
        value: Vec<String>,
    },
    /// Field matches a wildcard pattern
    Wildcard {
        field: String,
        operator: EntryOperator,
        value: String,
    },
    /// Field exists
    Exists {
        field: String,
        operator: EntryOperator,
    },
    /// Field value is contained in a value list
    List {
        field: String,
        operator: EntryOperator,
        list: ValueListRef,
    },
    /// Conditions on the objects of a nested field
    Nested {
        field: String,
        entries: Vec<ExceptionEntry>,
    },
}

impl ExceptionEntry {
    /// Field the entry applies to
    pub fn field(&self) -> &str {
        match self {
            ExceptionEntry::Match { field, .. }
            | ExceptionEntry::MatchAny { field, .. }
            | ExceptionEntry::Wildcard { field, .. }
            | ExceptionEntry::Exists { field, .. }
            | ExceptionEntry::List { field, .. }
            | ExceptionEntry::Nested { field, .. } => field,
        }
    }

    /// Whether the entry (or a nested one) uses a value list
    pub fn uses_value_list(&self) -> bool {
        match self {
            ExceptionEntry::List { .. } => true,
            ExceptionEntry::Nested { entries, .. } => entries.iter().any(Self::uses_value_list),
            _ => false,
        }
    }
}

/// An item of an exception list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionListItem {
    /// Saved object id
    pub id: String,
    /// Human-assigned item id
    pub item_id: String,
    /// List the item belongs to
    pub list_id: String,
    /// Name of the item
    pub name: String,
    /// Description of the item
    #[serde(default)]
    pub description: String,
    /// Namespace of the owning list
    #[serde(default)]
    pub namespace_type: NamespaceType,
    /// Conditions, all of which must hold
    pub entries: Vec<ExceptionEntry>,
    /// Operating systems the item applies to
    #[serde(default)]
    pub os_types: Vec<String>,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// Who created the item
    pub created_by: String,
}

impl ExceptionListItem {
    /// Whether any entry refers to a value list
    pub fn uses_value_list(&self) -> bool {
        self.entries.iter().any(ExceptionEntry::uses_value_list)
    }
}

/// Whether any item needs value-list lookups, which some rule kinds cannot apply
pub fn has_large_value_item(items: &[ExceptionListItem]) -> bool {
    items.iter().any(ExceptionListItem::uses_value_list)
}
