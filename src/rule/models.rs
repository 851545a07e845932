use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::rule::TransactionView;

/// Database identifier for a rule. Zero stands for a rule that has not been saved.
pub type RuleId = i64;

/// The group transactions are run through when they are created or updated.
pub const DEFAULT_RULE_GROUP: &str = "default";

/// A script that may rewrite incoming transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// The ID of the rule.
    pub id: RuleId,
    /// A short description.
    pub title: String,
    /// The pipeline the rule belongs to, `None` meaning [DEFAULT_RULE_GROUP].
    pub group_name: Option<String>,
    /// Rules run in ascending `sort_order`, then ascending ID.
    pub sort_order: i64,
    /// Disabled rules are skipped.
    pub enabled: bool,
    /// Whether a match stops the pipeline.
    pub is_final_rule: bool,
    /// The source of the script.
    pub script: String,
    /// When the rule was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the rule was last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// The fields of a rule that callers provide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleData {
    /// A short description.
    pub title: String,
    /// The pipeline the rule belongs to.
    #[serde(default)]
    pub group_name: Option<String>,
    /// The position of the rule in its pipeline.
    #[serde(default)]
    pub sort_order: i64,
    /// Whether the rule runs.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Whether a match stops the pipeline.
    #[serde(default)]
    pub is_final_rule: bool,
    /// The source of the script.
    pub script: String,
}

fn enabled_by_default() -> bool {
    true
}

impl RuleData {
    /// An enabled, non-final rule in the default group.
    pub fn new(title: &str, script: &str) -> Self {
        Self {
            title: title.to_owned(),
            group_name: None,
            sort_order: 0,
            enabled: true,
            is_final_rule: false,
            script: script.to_owned(),
        }
    }

    /// Set the position of the rule in its pipeline.
    pub fn sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Make a match stop the pipeline.
    pub fn final_rule(mut self) -> Self {
        self.is_final_rule = true;
        self
    }

    /// Put the rule in a named group.
    pub fn group(mut self, group_name: &str) -> Self {
        self.group_name = Some(group_name.to_owned());
        self
    }

    /// Stop the rule from running.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// The result of running the rule pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    /// The transaction with the changes of every matching rule.
    pub view: TransactionView,
    /// The rules that matched, in the order they ran.
    pub matched: Vec<RuleId>,
}

/// The result of trying one rule against a stored transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DryRunResult {
    /// Whether the rule matched.
    pub applied: bool,
    /// The transaction as stored.
    pub before: TransactionView,
    /// The transaction the pipeline would continue with.
    pub after: TransactionView,
}
