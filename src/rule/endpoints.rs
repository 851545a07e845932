//! JSON handlers for rules.

use axum::{Extension, Json, extract::State};
use rusqlite::Connection;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    auth::AuthContext,
    clock::now_utc,
    database_id::TransactionId,
    rule::{
        DryRunResult, Rule, RuleData, RuleEngine, RuleId, TransactionView, create_rule,
        delete_rule, get_rule, list_rules, update_rule,
    },
    transaction::get_transaction,
};

/// The request body for updating a rule.
#[derive(Debug, Deserialize)]
pub struct UpdateRuleRequest {
    /// The rule to update.
    pub id: RuleId,
    /// The new fields.
    #[serde(flatten)]
    pub data: RuleData,
}

/// The request body for operations on a single rule.
#[derive(Debug, Deserialize)]
pub struct RuleIdRequest {
    /// The rule to operate on.
    pub id: RuleId,
}

/// The request body for a dry run.
///
/// Either a saved rule or an unsaved script is run against a stored transaction.
#[derive(Debug, Deserialize)]
pub struct DryRunRequest {
    /// The transaction to run the rule against.
    pub transaction_id: TransactionId,
    /// A saved rule to run.
    #[serde(default)]
    pub rule_id: Option<RuleId>,
    /// A script to run instead of a saved rule.
    #[serde(default)]
    pub script: Option<String>,
}

/// Run a rule against a stored transaction without saving anything.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if neither a rule nor a script is given,
/// - [Error::NotFound] if the transaction or rule does not exist,
/// - or any error [RuleEngine::dry_run] returns.
pub fn dry_run_rule(
    transaction_id: TransactionId,
    rule_id: Option<RuleId>,
    script: Option<&str>,
    engine: &RuleEngine,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<DryRunResult, Error> {
    let transaction = get_transaction(transaction_id, connection)?;
    let view = TransactionView::from(&transaction);

    match (script, rule_id) {
        (Some(script), _) => engine.dry_run(0, script, &view, now),
        (None, Some(rule_id)) => {
            let rule = get_rule(rule_id, connection)?;
            engine.dry_run(rule.id, &rule.script, &view, now)
        }
        (None, None) => Err(Error::InvalidArgument(
            "a dry run needs a rule_id or a script".to_owned(),
        )),
    }
}

/// Handle rule creation.
pub async fn create_rule_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(data): Json<RuleData>,
) -> Result<Json<Rule>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    create_rule(data, &state.rules, now_utc(), &connection).map(Json)
}

/// Handle rule updates.
pub async fn update_rule_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<UpdateRuleRequest>,
) -> Result<Json<Rule>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    update_rule(request.id, request.data, &state.rules, now_utc(), &connection).map(Json)
}

/// Handle rule deletion.
pub async fn delete_rule_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<RuleIdRequest>,
) -> Result<Json<()>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    delete_rule(request.id, &state.rules, now_utc(), &connection).map(Json)
}

/// List every live rule.
pub async fn list_rules_endpoint(State(state): State<AppState>) -> Result<Json<Vec<Rule>>, Error> {
    let connection = state.db.read()?;

    list_rules(&connection).map(Json)
}

/// Handle dry runs.
pub async fn dry_run_rule_endpoint(
    State(state): State<AppState>,
    Json(request): Json<DryRunRequest>,
) -> Result<Json<DryRunResult>, Error> {
    let connection = state.db.read()?;

    dry_run_rule(
        request.transaction_id,
        request.rule_id,
        request.script.as_deref(),
        &state.rules,
        now_utc(),
        &connection,
    )
    .map(Json)
}
