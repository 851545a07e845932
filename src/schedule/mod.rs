//! Recurring transactions and the background scheduler.
//!
//! A [ScheduleRule] pairs a 5-field cron expression with a [TransactionTemplate]. The
//! [Scheduler] checks for due rules every minute, and also runs the nightly rate sync and
//! balance snapshot jobs.

mod cron;
mod db;
mod endpoints;
mod scheduler;

pub use cron::{CronSchedule, validate_cron_expression};
pub use db::{
    ScheduleRule, ScheduleRuleData, ScheduleRuleId, TODAY_TOKEN, TransactionTemplate,
    advance_schedule_rule, create_schedule_rule, create_schedule_rule_table,
    delete_schedule_rule, get_due_schedule_rules, get_schedule_rule, list_schedule_rules,
    update_schedule_rule,
};
pub use endpoints::{
    create_schedule_rule_endpoint, delete_schedule_rule_endpoint, list_schedule_rules_endpoint,
    process_due_schedule_rules_endpoint, update_schedule_rule_endpoint,
    validate_cron_expression_endpoint,
};
pub use scheduler::{
    DAILY_GAP_SCHEDULE, RATE_SYNC_SCHEDULE, ScheduleRunSummary, Scheduler, SchedulerCommand,
    SchedulerHandle, process_due_schedule_rules,
};
