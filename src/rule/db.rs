use rusqlite::{Connection, Row};
use time::OffsetDateTime;

use crate::{
    Error,
    rule::{DEFAULT_RULE_GROUP, Rule, RuleData, RuleEngine, RuleId},
};

const RULE_COLUMNS: &str = "id, title, group_name, sort_order, enabled, is_final_rule, script, \
    created_at, updated_at";

/// Create the rule table.
pub fn create_rule_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS rule (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            group_name TEXT,
            sort_order INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            is_final_rule INTEGER NOT NULL DEFAULT 0,
            script TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_rule_pipeline
            ON rule(group_name, sort_order, id) WHERE deleted_at IS NULL;",
    )?;

    Ok(())
}

fn map_rule_row(row: &Row) -> Result<Rule, rusqlite::Error> {
    Ok(Rule {
        id: row.get(0)?,
        title: row.get(1)?,
        group_name: row.get(2)?,
        sort_order: row.get(3)?,
        enabled: row.get(4)?,
        is_final_rule: row.get(5)?,
        script: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Trim the title and normalise an empty or default group name to `None`.
fn validate(mut data: RuleData) -> Result<RuleData, Error> {
    data.title = data.title.trim().to_owned();
    if data.title.is_empty() {
        return Err(Error::InvalidArgument(
            "rule title cannot be empty".to_owned(),
        ));
    }

    data.group_name = data
        .group_name
        .map(|group| group.trim().to_owned())
        .filter(|group| !group.is_empty() && group != DEFAULT_RULE_GROUP);

    Ok(data)
}

/// Create a rule after checking that its script compiles.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if the title is empty,
/// - [Error::RuleCompileError] if the script does not compile,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_rule(
    data: RuleData,
    engine: &RuleEngine,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Rule, Error> {
    let data = validate(data)?;
    engine.check(&data.script)?;

    let rule = connection
        .prepare(&format!(
            "INSERT INTO rule
                (title, group_name, sort_order, enabled, is_final_rule, script, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             RETURNING {RULE_COLUMNS}"
        ))?
        .query_row(
            (
                &data.title,
                &data.group_name,
                data.sort_order,
                data.enabled,
                data.is_final_rule,
                &data.script,
                now,
            ),
            map_rule_row,
        )?;

    tracing::info!("Created rule {} \"{}\"", rule.id, rule.title);

    Ok(rule)
}

/// Replace the fields of a live rule.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if there is no live rule with the ID,
/// - or any error [create_rule] returns.
pub fn update_rule(
    rule_id: RuleId,
    data: RuleData,
    engine: &RuleEngine,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Rule, Error> {
    let data = validate(data)?;
    engine.check(&data.script).map_err(|error| match error {
        Error::RuleCompileError { message, .. } => Error::RuleCompileError { rule_id, message },
        error => error,
    })?;

    let rows_affected = connection.execute(
        "UPDATE rule
         SET title = ?1, group_name = ?2, sort_order = ?3, enabled = ?4, is_final_rule = ?5,
             script = ?6, updated_at = ?7
         WHERE id = ?8 AND deleted_at IS NULL",
        (
            &data.title,
            &data.group_name,
            data.sort_order,
            data.enabled,
            data.is_final_rule,
            &data.script,
            now,
            rule_id,
        ),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    engine.forget(rule_id);

    get_rule(rule_id, connection)
}

/// Soft delete a rule.
///
/// # Errors
/// Returns [Error::NotFound] if there is no live rule with the ID.
pub fn delete_rule(
    rule_id: RuleId,
    engine: &RuleEngine,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE rule SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        (now, rule_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    engine.forget(rule_id);

    Ok(())
}

/// Retrieve a live rule by ID.
///
/// # Errors
/// Returns [Error::NotFound] if there is no live rule with the ID.
pub fn get_rule(rule_id: RuleId, connection: &Connection) -> Result<Rule, Error> {
    connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM rule WHERE id = ?1 AND deleted_at IS NULL"
        ))?
        .query_row([rule_id], map_rule_row)
        .map_err(|error| error.into())
}

/// Retrieve every live rule, grouped and in pipeline order.
pub fn list_rules(connection: &Connection) -> Result<Vec<Rule>, Error> {
    connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM rule WHERE deleted_at IS NULL
             ORDER BY COALESCE(group_name, '{DEFAULT_RULE_GROUP}'), sort_order, id"
        ))?
        .query_map([], map_rule_row)?
        .map(|maybe_rule| maybe_rule.map_err(|error| error.into()))
        .collect()
}

/// Retrieve the enabled live rules of `group` in the order the pipeline runs them.
pub fn list_pipeline_rules(group: &str, connection: &Connection) -> Result<Vec<Rule>, Error> {
    connection
        .prepare(&format!(
            "SELECT {RULE_COLUMNS} FROM rule
             WHERE deleted_at IS NULL AND enabled = 1
               AND COALESCE(group_name, '{DEFAULT_RULE_GROUP}') = ?1
             ORDER BY sort_order, id"
        ))?
        .query_map([group], map_rule_row)?
        .map(|maybe_rule| maybe_rule.map_err(|error| error.into()))
        .collect()
}

#[cfg(test)]
mod rule_db_tests {
    use time::macros::datetime;

    use crate::{
        Error,
        rule::{DEFAULT_RULE_GROUP, RuleData, RuleEngine},
        test_utils::get_test_connection,
    };

    use super::{create_rule, delete_rule, get_rule, list_pipeline_rules, list_rules, update_rule};

    const NOW: time::OffsetDateTime = datetime!(2025-04-01 12:00 UTC);

    #[test]
    fn create_rule_succeeds() {
        let connection = get_test_connection();
        let engine = RuleEngine::new();

        let rule = create_rule(
            RuleData::new("  Coffee ", "return tx.title contains \"Coffee\";"),
            &engine,
            NOW,
            &connection,
        )
        .unwrap();

        assert_eq!(rule.title, "Coffee");
        assert!(rule.enabled);
        assert_eq!(rule.group_name, None);
        assert_eq!(get_rule(rule.id, &connection), Ok(rule));
    }

    #[test]
    fn create_rule_rejects_broken_script() {
        let connection = get_test_connection();
        let engine = RuleEngine::new();

        let result = create_rule(
            RuleData::new("Broken", "return tx.title matches;"),
            &engine,
            NOW,
            &connection,
        );

        let error = result.unwrap_err();
        assert!(matches!(error, Error::RuleCompileError { rule_id: 0, .. }));
        assert_eq!(error.kind(), crate::ErrorKind::InvalidArgument);
        assert_eq!(list_rules(&connection), Ok(vec![]));
    }

    #[test]
    fn pipeline_rules_are_ordered_and_filtered() {
        let connection = get_test_connection();
        let engine = RuleEngine::new();
        let create = |data: RuleData| create_rule(data, &engine, NOW, &connection).unwrap();

        let late = create(RuleData::new("Late", "return true;").sort_order(10));
        let early = create(RuleData::new("Early", "return true;").sort_order(-1));
        let explicit_default =
            create(RuleData::new("Explicit", "return true;").group(DEFAULT_RULE_GROUP));
        create(RuleData::new("Off", "return true;").disabled());
        create(RuleData::new("Other", "return true;").group("imports"));
        let deleted = create(RuleData::new("Gone", "return true;"));
        delete_rule(deleted.id, &engine, NOW, &connection).unwrap();

        let ids: Vec<_> = list_pipeline_rules(DEFAULT_RULE_GROUP, &connection)
            .unwrap()
            .into_iter()
            .map(|rule| rule.id)
            .collect();

        assert_eq!(ids, vec![early.id, explicit_default.id, late.id]);
        assert_eq!(explicit_default.group_name, None);
    }

    #[test]
    fn update_rule_replaces_fields() {
        let connection = get_test_connection();
        let engine = RuleEngine::new();
        let rule = create_rule(RuleData::new("Old", "return false;"), &engine, NOW, &connection)
            .unwrap();
        let later = datetime!(2025-04-02 12:00 UTC);

        let updated = update_rule(
            rule.id,
            RuleData::new("New", "return true;").final_rule(),
            &engine,
            later,
            &connection,
        )
        .unwrap();

        assert_eq!(updated.title, "New");
        assert!(updated.is_final_rule);
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.created_at, NOW);
    }

    #[test]
    fn update_rule_reports_compile_error_with_id() {
        let connection = get_test_connection();
        let engine = RuleEngine::new();
        let rule = create_rule(RuleData::new("Old", "return false;"), &engine, NOW, &connection)
            .unwrap();

        let result = update_rule(
            rule.id,
            RuleData::new("New", "return nope;"),
            &engine,
            NOW,
            &connection,
        );

        assert!(matches!(result, Err(Error::RuleCompileError { rule_id, .. }) if rule_id == rule.id));
    }

    #[test]
    fn missing_rules_are_not_found() {
        let connection = get_test_connection();
        let engine = RuleEngine::new();

        assert_eq!(get_rule(42, &connection), Err(Error::NotFound));
        assert_eq!(delete_rule(42, &engine, NOW, &connection), Err(Error::NotFound));
        assert_eq!(
            update_rule(42, RuleData::new("x", "return true;"), &engine, NOW, &connection),
            Err(Error::NotFound)
        );
    }
}
