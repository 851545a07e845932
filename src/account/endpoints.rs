//! JSON handlers for accounts.

use axum::{Extension, Json, extract::State};
use serde::Deserialize;

use crate::{
    AppState, Error,
    account::{
        Account, AccountId, AccountUpdate, ApplicableAccounts, NewAccount, create_account,
        create_accounts_bulk, delete_account, get_applicable_accounts, list_accounts,
        reorder_accounts, update_account,
    },
    auth::AuthContext,
    clock::now_utc,
    transaction::TransactionType,
};

/// The request body for creating several accounts at once.
#[derive(Debug, Deserialize)]
pub struct CreateAccountsBulkRequest {
    /// The accounts to create, all or none.
    pub accounts: Vec<NewAccount>,
}

/// The request body for deleting an account.
#[derive(Debug, Deserialize)]
pub struct AccountIdRequest {
    /// The account to delete.
    pub id: AccountId,
}

/// The request body for listing accounts.
#[derive(Debug, Default, Deserialize)]
pub struct ListAccountsRequest {
    /// Whether deleted accounts are included.
    #[serde(default)]
    pub include_deleted: bool,
}

/// The request body for reordering accounts.
#[derive(Debug, Deserialize)]
pub struct ReorderAccountsRequest {
    /// Every live account ID in the new display order.
    pub ids: Vec<AccountId>,
}

/// The request body for listing the accounts a transaction type may use.
#[derive(Debug, Deserialize)]
pub struct ApplicableAccountsRequest {
    /// The transaction type.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
}

/// Handle account creation.
pub async fn create_account_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(new_account): Json<NewAccount>,
) -> Result<Json<Account>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    create_account(new_account, now_utc(), &connection).map(Json)
}

/// Handle bulk account creation.
pub async fn create_accounts_bulk_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateAccountsBulkRequest>,
) -> Result<Json<Vec<Account>>, Error> {
    auth.require_user()?;
    let mut connection = state.db.write()?;

    create_accounts_bulk(request.accounts, now_utc(), &mut connection).map(Json)
}

/// Handle account updates.
pub async fn update_account_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(update): Json<AccountUpdate>,
) -> Result<Json<Account>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    update_account(update, now_utc(), &connection).map(Json)
}

/// Handle account deletion.
pub async fn delete_account_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<AccountIdRequest>,
) -> Result<Json<()>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    delete_account(request.id, now_utc(), &connection).map(Json)
}

/// List accounts in display order.
pub async fn list_accounts_endpoint(
    State(state): State<AppState>,
    Json(request): Json<ListAccountsRequest>,
) -> Result<Json<Vec<Account>>, Error> {
    let connection = state.db.read()?;

    list_accounts(request.include_deleted, &connection).map(Json)
}

/// Handle account reordering.
pub async fn reorder_accounts_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ReorderAccountsRequest>,
) -> Result<Json<Vec<Account>>, Error> {
    auth.require_user()?;
    let mut connection = state.db.write()?;

    reorder_accounts(&request.ids, now_utc(), &mut connection).map(Json)
}

/// List the accounts each side of a transaction type may use.
pub async fn get_applicable_accounts_endpoint(
    State(state): State<AppState>,
    Json(request): Json<ApplicableAccountsRequest>,
) -> Result<Json<ApplicableAccounts>, Error> {
    let connection = state.db.read()?;

    get_applicable_accounts(request.transaction_type, &connection).map(Json)
}

#[cfg(test)]
mod account_endpoint_tests {
    use axum::{Router, http::StatusCode, middleware, routing::post};
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use time::Duration;

    use crate::{
        AppState,
        auth::{TokenType, UserID, auth_middleware},
        clock::now_utc,
    };

    use super::{
        create_account_endpoint, create_accounts_bulk_endpoint, get_applicable_accounts_endpoint,
        list_accounts_endpoint,
    };

    fn server(state: AppState) -> TestServer {
        let app = Router::new()
            .route("/create", post(create_account_endpoint))
            .route("/bulk", post(create_accounts_bulk_endpoint))
            .route("/list", post(list_accounts_endpoint))
            .route("/applicable", post(get_applicable_accounts_endpoint))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state);

        TestServer::try_new(app).unwrap()
    }

    fn token(state: &AppState) -> String {
        state
            .tokens
            .generate_token(UserID::new(1), TokenType::Web, Duration::hours(1), now_utc())
            .unwrap()
            .token
    }

    #[tokio::test]
    async fn anonymous_create_is_forbidden() {
        let server = server(AppState::for_tests());

        let response = server
            .post("/create")
            .json(&json!({ "name": "Savings", "type": "asset", "currency": "USD" }))
            .await;

        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn created_account_is_listed() {
        let state = AppState::for_tests();
        let token = token(&state);
        let server = server(state);

        let created = server
            .post("/create")
            .authorization_bearer(&token)
            .json(&json!({ "name": "Savings", "type": "asset", "currency": "USD" }))
            .await;
        created.assert_status_ok();

        let listed = server.post("/list").json(&json!({})).await;

        listed.assert_status_ok();
        let names: Vec<Value> = listed
            .json::<Vec<Value>>()
            .into_iter()
            .map(|account| account["name"].clone())
            .collect();
        assert!(names.contains(&json!("Savings")));
    }

    #[tokio::test]
    async fn failed_bulk_create_creates_nothing() {
        let state = AppState::for_tests();
        let token = token(&state);
        let server = server(state);
        let before = server.post("/list").json(&json!({})).await.json::<Vec<Value>>().len();

        let response = server
            .post("/bulk")
            .authorization_bearer(&token)
            .json(&json!({ "accounts": [
                { "name": "Savings", "type": "asset", "currency": "USD" },
                { "name": "Broken", "type": "asset", "currency": "XYZ" }
            ]}))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let after = server.post("/list").json(&json!({})).await.json::<Vec<Value>>().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn withdrawal_destinations_are_expense_accounts() {
        let server = server(AppState::for_tests());

        let response = server
            .post("/applicable")
            .json(&json!({ "type": "withdrawal" }))
            .await;

        response.assert_status_ok();
        let body = response.json::<Value>();
        let destinations = body["destination"].as_array().unwrap();
        assert!(!destinations.is_empty());
        assert!(
            destinations
                .iter()
                .all(|account| account["type"] == "expense")
        );
    }
}
