//! JSON handlers for schedule rules.

use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    auth::AuthContext,
    clock::now_utc,
    schedule::{
        ScheduleRule, ScheduleRuleData, ScheduleRuleId, ScheduleRunSummary, create_schedule_rule,
        delete_schedule_rule, list_schedule_rules, process_due_schedule_rules,
        update_schedule_rule, validate_cron_expression,
    },
    transaction::PostingContext,
};

/// The request body for updating a schedule rule.
#[derive(Debug, Deserialize)]
pub struct UpdateScheduleRuleRequest {
    /// The schedule rule to update.
    pub id: ScheduleRuleId,
    /// The new fields.
    #[serde(flatten)]
    pub data: ScheduleRuleData,
}

/// The request body for deleting a schedule rule.
#[derive(Debug, Deserialize)]
pub struct ScheduleRuleIdRequest {
    /// The schedule rule to delete.
    pub id: ScheduleRuleId,
}

/// The request body for checking a cron expression.
#[derive(Debug, Deserialize)]
pub struct CronExpressionRequest {
    /// The expression to check.
    pub expression: String,
}

/// Whether a cron expression is valid, and why not.
#[derive(Debug, PartialEq, Serialize)]
pub struct CronExpressionResponse {
    /// Whether the expression parsed.
    pub valid: bool,
    /// The parse error, if any.
    pub error: Option<String>,
}

/// Handle schedule rule creation.
pub async fn create_schedule_rule_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(data): Json<ScheduleRuleData>,
) -> Result<Json<ScheduleRule>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    create_schedule_rule(data, now_utc(), &connection).map(Json)
}

/// Handle schedule rule updates.
pub async fn update_schedule_rule_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<UpdateScheduleRuleRequest>,
) -> Result<Json<ScheduleRule>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    update_schedule_rule(request.id, request.data, now_utc(), &connection).map(Json)
}

/// Handle schedule rule deletion.
pub async fn delete_schedule_rule_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ScheduleRuleIdRequest>,
) -> Result<Json<()>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    delete_schedule_rule(request.id, now_utc(), &connection).map(Json)
}

/// List every live schedule rule.
pub async fn list_schedule_rules_endpoint(
    State(state): State<AppState>,
) -> Result<Json<Vec<ScheduleRule>>, Error> {
    let connection = state.db.read()?;

    list_schedule_rules(&connection).map(Json)
}

/// Check a cron expression without saving anything.
pub async fn validate_cron_expression_endpoint(
    Json(request): Json<CronExpressionRequest>,
) -> Json<CronExpressionResponse> {
    let response = match validate_cron_expression(&request.expression) {
        Ok(()) => CronExpressionResponse {
            valid: true,
            error: None,
        },
        Err(error) => CronExpressionResponse {
            valid: false,
            error: Some(error.to_string()),
        },
    };

    Json(response)
}

/// Process the due schedule rules now instead of waiting for the next tick.
pub async fn process_due_schedule_rules_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ScheduleRunSummary>, Error> {
    auth.require_user()?;
    let mut connection = state.db.write()?;
    let context = PostingContext::new(&state.config, &state.rules, now_utc());

    process_due_schedule_rules(context, &mut connection).map(Json)
}
