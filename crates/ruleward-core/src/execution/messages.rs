//! Rule-scoped log and status messages

/// Appends the rule identity to every message so log lines can be traced
/// back to the rule and index that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMessageBuilder {
    id: String,
    rule_id: Option<String>,
    index: String,
    name: String,
}

impl RuleMessageBuilder {
    /// Create a builder for one rule
    pub fn new(
        id: impl Into<String>,
        rule_id: Option<String>,
        index: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rule_id,
            index: index.into(),
            name: name.into(),
        }
    }

    /// Join the messages and append the rule identity
    pub fn build<S: AsRef<str>>(&self, messages: &[S]) -> String {
        let rule_id = self.rule_id.as_deref().unwrap_or("(unknown rule id)");

        messages
            .iter()
            .map(|m| m.as_ref().to_string())
            .chain([
                format!("name: \"{}\"", self.name),
                format!("id: \"{}\"", self.id),
                format!("rule id: \"{rule_id}\""),
                format!("signals index: \"{}\"", self.index),
            ])
            .collect::<Vec<_>>()
            .join(" ")
    }
}
