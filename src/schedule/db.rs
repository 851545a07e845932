//! Schedule rules and the templates they materialise.

use rusqlite::{Connection, Row, types::Type};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    account::AccountId,
    category::CategoryId,
    schedule::CronSchedule,
    tag::TagId,
    transaction::{CreateTransactionRequest, TransactionType},
};

/// Database identifier for a schedule rule.
pub type ScheduleRuleId = i64;

/// The token in a template title replaced by the UTC date of the run.
pub const TODAY_TOKEN: &str = "{today}";

// ============================================================================
// MODELS
// ============================================================================

/// The transaction a schedule rule creates each time it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionTemplate {
    /// The kind of movement.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Where the money comes from.
    #[serde(default)]
    pub source_account_id: Option<AccountId>,
    /// How much leaves the source.
    #[serde(default)]
    pub source_amount: Option<Decimal>,
    /// The currency of `source_amount`.
    #[serde(default)]
    pub source_currency: Option<String>,
    /// Where the money goes.
    #[serde(default)]
    pub destination_account_id: Option<AccountId>,
    /// How much arrives at the destination.
    #[serde(default)]
    pub destination_amount: Option<Decimal>,
    /// The currency of `destination_amount`.
    #[serde(default)]
    pub destination_currency: Option<String>,
    /// The title, where [TODAY_TOKEN] is replaced by the date of the run.
    #[serde(default)]
    pub title: String,
    /// Free form notes.
    #[serde(default)]
    pub notes: String,
    /// The category of the created transactions.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// The tags of the created transactions.
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// Whether the created transactions bypass the rule engine.
    #[serde(default)]
    pub skip_rules: bool,
}

impl TransactionTemplate {
    /// The request for the run on `today`, dated `now`.
    pub fn materialize(&self, today: Date, now: OffsetDateTime) -> CreateTransactionRequest {
        CreateTransactionRequest {
            transaction_type: self.transaction_type,
            source_account_id: self.source_account_id,
            source_amount: self.source_amount,
            source_currency: self.source_currency.clone(),
            destination_account_id: self.destination_account_id,
            destination_amount: self.destination_amount,
            destination_currency: self.destination_currency.clone(),
            title: self.title.replace(TODAY_TOKEN, &today.to_string()),
            notes: self.notes.clone(),
            category_id: self.category_id,
            tag_ids: self.tag_ids.clone(),
            transaction_date: now,
            import_id: None,
            skip_rules: self.skip_rules,
        }
    }
}

/// A transaction that is created on a cron schedule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleRule {
    /// The ID of the schedule rule.
    pub id: ScheduleRuleId,
    /// A short description.
    pub title: String,
    /// When the rule fires, in the 5-field cron grammar.
    pub cron_expression: String,
    /// The next time the rule fires.
    #[serde(with = "time::serde::rfc3339")]
    pub next_execute_at: OffsetDateTime,
    /// The last time the rule created a transaction.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_executed_at: Option<OffsetDateTime>,
    /// The transaction to create.
    pub template: TransactionTemplate,
    /// Disabled rules do not fire.
    pub enabled: bool,
    /// When the rule was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the rule was last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// The fields of a schedule rule that callers provide.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScheduleRuleData {
    /// A short description.
    pub title: String,
    /// When the rule fires.
    pub cron_expression: String,
    /// The transaction to create.
    pub template: TransactionTemplate,
    /// Whether the rule fires.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

const SCHEDULE_RULE_COLUMNS: &str = "id, title, cron_expression, next_execute_at, \
    last_executed_at, template, enabled, created_at, updated_at";

/// Create the schedule_rule table.
pub fn create_schedule_rule_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS schedule_rule (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            cron_expression TEXT NOT NULL,
            next_execute_at TEXT NOT NULL,
            last_executed_at TEXT,
            template TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_schedule_rule_due
            ON schedule_rule(next_execute_at) WHERE deleted_at IS NULL AND enabled = 1;",
    )?;

    Ok(())
}

fn map_schedule_rule_row(row: &Row) -> Result<ScheduleRule, rusqlite::Error> {
    let template: String = row.get(5)?;
    let template = serde_json::from_str(&template)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(error)))?;

    Ok(ScheduleRule {
        id: row.get(0)?,
        title: row.get(1)?,
        cron_expression: row.get(2)?,
        next_execute_at: row.get(3)?,
        last_executed_at: row.get(4)?,
        template,
        enabled: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Check the fields of a schedule rule and work out when it first fires after `now`.
fn prepare(
    data: &ScheduleRuleData,
    now: OffsetDateTime,
) -> Result<(String, String, OffsetDateTime, String), Error> {
    let title = data.title.trim();
    if title.is_empty() {
        return Err(Error::InvalidArgument(
            "schedule rule title cannot be empty".to_owned(),
        ));
    }

    let schedule = CronSchedule::parse(&data.cron_expression)?;
    let next_execute_at = schedule.next_after(now).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "cron expression \"{}\" never fires",
            schedule.expression()
        ))
    })?;

    let template = serde_json::to_string(&data.template)
        .map_err(|error| Error::JSONSerializationError(error.to_string()))?;

    Ok((
        title.to_owned(),
        schedule.expression().to_owned(),
        next_execute_at,
        template,
    ))
}

/// Create a schedule rule that first fires at the next cron tick after `now`.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if the title is empty or the schedule never fires,
/// - [Error::InvalidCronExpression] if the cron expression is malformed,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_schedule_rule(
    data: ScheduleRuleData,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<ScheduleRule, Error> {
    let (title, cron_expression, next_execute_at, template) = prepare(&data, now)?;

    let rule = connection
        .prepare(&format!(
            "INSERT INTO schedule_rule
                (title, cron_expression, next_execute_at, template, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             RETURNING {SCHEDULE_RULE_COLUMNS}"
        ))?
        .query_row(
            (
                title,
                cron_expression,
                next_execute_at,
                template,
                data.enabled,
                now,
            ),
            map_schedule_rule_row,
        )?;

    tracing::info!(
        "Created schedule rule {} \"{}\", next run at {}",
        rule.id,
        rule.title,
        rule.next_execute_at
    );

    Ok(rule)
}

/// Replace a live schedule rule. The next run is recomputed from `now`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if there is no live schedule rule with the ID,
/// - or any error [create_schedule_rule] returns.
pub fn update_schedule_rule(
    rule_id: ScheduleRuleId,
    data: ScheduleRuleData,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<ScheduleRule, Error> {
    let (title, cron_expression, next_execute_at, template) = prepare(&data, now)?;

    let rows_affected = connection.execute(
        "UPDATE schedule_rule
         SET title = ?1, cron_expression = ?2, next_execute_at = ?3, template = ?4, enabled = ?5,
             updated_at = ?6
         WHERE id = ?7 AND deleted_at IS NULL",
        (
            title,
            cron_expression,
            next_execute_at,
            template,
            data.enabled,
            now,
            rule_id,
        ),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    get_schedule_rule(rule_id, connection)
}

/// Soft delete a schedule rule.
///
/// # Errors
/// Returns [Error::NotFound] if there is no live schedule rule with the ID.
pub fn delete_schedule_rule(
    rule_id: ScheduleRuleId,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE schedule_rule SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        (now, rule_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Retrieve a live schedule rule.
///
/// # Errors
/// Returns [Error::NotFound] if there is no live schedule rule with the ID.
pub fn get_schedule_rule(
    rule_id: ScheduleRuleId,
    connection: &Connection,
) -> Result<ScheduleRule, Error> {
    connection
        .prepare(&format!(
            "SELECT {SCHEDULE_RULE_COLUMNS} FROM schedule_rule
             WHERE id = ?1 AND deleted_at IS NULL"
        ))?
        .query_row([rule_id], map_schedule_rule_row)
        .map_err(|error| error.into())
}

/// Retrieve every live schedule rule ordered by ID.
pub fn list_schedule_rules(connection: &Connection) -> Result<Vec<ScheduleRule>, Error> {
    connection
        .prepare(&format!(
            "SELECT {SCHEDULE_RULE_COLUMNS} FROM schedule_rule
             WHERE deleted_at IS NULL ORDER BY id"
        ))?
        .query_map([], map_schedule_rule_row)?
        .map(|maybe_rule| maybe_rule.map_err(|error| error.into()))
        .collect()
}

/// Retrieve the enabled live rules due at `now`, the most overdue first.
pub fn get_due_schedule_rules(
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Vec<ScheduleRule>, Error> {
    connection
        .prepare(&format!(
            "SELECT {SCHEDULE_RULE_COLUMNS} FROM schedule_rule
             WHERE deleted_at IS NULL AND enabled = 1 AND next_execute_at <= ?1
             ORDER BY next_execute_at, id"
        ))?
        .query_map([now], map_schedule_rule_row)?
        .map(|maybe_rule| maybe_rule.map_err(|error| error.into()))
        .collect()
}

/// Move a rule to its next run if it is still armed for `expected_next`.
///
/// Returns false if another run already advanced or disabled the rule.
pub fn advance_schedule_rule(
    rule_id: ScheduleRuleId,
    expected_next: OffsetDateTime,
    next_execute_at: OffsetDateTime,
    executed_at: OffsetDateTime,
    connection: &Connection,
) -> Result<bool, Error> {
    let rows_affected = connection.execute(
        "UPDATE schedule_rule SET next_execute_at = ?1, last_executed_at = ?2
         WHERE id = ?3 AND next_execute_at = ?4 AND enabled = 1 AND deleted_at IS NULL",
        (next_execute_at, executed_at, rule_id, expected_next),
    )?;

    Ok(rows_affected == 1)
}

#[cfg(test)]
mod schedule_rule_tests {
    use time::macros::{date, datetime};

    use crate::{
        Error,
        test_utils::{dec, get_test_connection},
        transaction::TransactionType,
    };

    use super::{
        ScheduleRuleData, TransactionTemplate, create_schedule_rule, delete_schedule_rule,
        get_due_schedule_rules, get_schedule_rule, list_schedule_rules, update_schedule_rule,
    };

    const NOW: time::OffsetDateTime = datetime!(2025-05-01 08:00 UTC);

    fn rent() -> ScheduleRuleData {
        ScheduleRuleData {
            title: "Rent".to_owned(),
            cron_expression: "0 9 * * *".to_owned(),
            template: TransactionTemplate {
                transaction_type: TransactionType::Withdrawal,
                source_account_id: Some(4),
                source_amount: Some(dec("1200")),
                source_currency: None,
                destination_account_id: None,
                destination_amount: None,
                destination_currency: None,
                title: "Rent {today}".to_owned(),
                notes: String::new(),
                category_id: None,
                tag_ids: vec![],
                skip_rules: false,
            },
            enabled: true,
        }
    }

    #[test]
    fn create_schedule_rule_arms_next_tick() {
        let connection = get_test_connection();

        let rule = create_schedule_rule(rent(), NOW, &connection).unwrap();

        assert_eq!(rule.next_execute_at, datetime!(2025-05-01 09:00 UTC));
        assert_eq!(rule.last_executed_at, None);
        assert_eq!(get_schedule_rule(rule.id, &connection), Ok(rule));
    }

    #[test]
    fn create_schedule_rule_rejects_bad_cron() {
        let connection = get_test_connection();
        let data = ScheduleRuleData {
            cron_expression: "0 25 * * *".to_owned(),
            ..rent()
        };

        let result = create_schedule_rule(data, NOW, &connection);

        assert!(matches!(result, Err(Error::InvalidCronExpression { .. })));
        assert_eq!(list_schedule_rules(&connection), Ok(vec![]));
    }

    #[test]
    fn template_replaces_today_in_title() {
        let request = rent()
            .template
            .materialize(date!(2025-05-01), datetime!(2025-05-01 09:00 UTC));

        assert_eq!(request.title, "Rent 2025-05-01");
        assert_eq!(request.transaction_date, datetime!(2025-05-01 09:00 UTC));
    }

    #[test]
    fn due_rules_exclude_future_disabled_and_deleted() {
        let connection = get_test_connection();
        let due = create_schedule_rule(rent(), NOW, &connection).unwrap();
        create_schedule_rule(
            ScheduleRuleData {
                enabled: false,
                ..rent()
            },
            NOW,
            &connection,
        )
        .unwrap();
        let deleted = create_schedule_rule(rent(), NOW, &connection).unwrap();
        delete_schedule_rule(deleted.id, NOW, &connection).unwrap();
        create_schedule_rule(
            ScheduleRuleData {
                cron_expression: "0 18 * * *".to_owned(),
                ..rent()
            },
            NOW,
            &connection,
        )
        .unwrap();

        let ids: Vec<_> = get_due_schedule_rules(datetime!(2025-05-01 09:00 UTC), &connection)
            .unwrap()
            .into_iter()
            .map(|rule| rule.id)
            .collect();

        assert_eq!(ids, vec![due.id]);
    }

    #[test]
    fn update_recomputes_next_run() {
        let connection = get_test_connection();
        let rule = create_schedule_rule(rent(), NOW, &connection).unwrap();

        let updated = update_schedule_rule(
            rule.id,
            ScheduleRuleData {
                cron_expression: "0 7 * * *".to_owned(),
                ..rent()
            },
            NOW,
            &connection,
        )
        .unwrap();

        assert_eq!(updated.next_execute_at, datetime!(2025-05-02 07:00 UTC));
        assert_eq!(updated.cron_expression, "0 7 * * *");
    }
}
