//! Rules rewrite transactions before they are saved.
//!
//! A rule is a small script that looks at a transaction through the `tx` object and may set its
//! category, title, notes and tags. Rules are grouped into pipelines that run in order, see
//! [RuleEngine::run_pipeline].

mod db;
mod endpoints;
mod engine;
mod models;
pub mod script;
mod view;

pub use db::{
    create_rule, create_rule_table, delete_rule, get_rule, list_pipeline_rules, list_rules,
    update_rule,
};
pub use endpoints::{
    create_rule_endpoint, delete_rule_endpoint, dry_run_rule, dry_run_rule_endpoint,
    list_rules_endpoint, update_rule_endpoint,
};
pub use engine::RuleEngine;
pub use models::{
    DEFAULT_RULE_GROUP, DryRunResult, PipelineOutcome, Rule, RuleData, RuleId,
};
pub use script::ScriptPosition;
pub use view::TransactionView;
