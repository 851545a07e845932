//! JSON handlers for the transaction service.

use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    auth::AuthContext,
    clock::now_utc,
    database_id::TransactionId,
    transaction::{
        CreateTransactionRequest, PostingContext, Transaction, TransactionFilter, TransactionPage,
        UpdateTransactionRequest, create_transaction, create_transactions_bulk,
        delete_transactions, get_title_suggestions, get_transaction, list_transactions,
        update_transaction,
    },
};

/// The request body for creating several transactions at once.
#[derive(Debug, Deserialize)]
pub struct CreateTransactionsBulkRequest {
    /// The transactions to create, in order.
    pub transactions: Vec<CreateTransactionRequest>,
}

/// The request body for deleting transactions.
#[derive(Debug, Deserialize)]
pub struct DeleteTransactionsRequest {
    /// The transactions to delete.
    pub ids: Vec<TransactionId>,
}

/// The request body for fetching one transaction.
#[derive(Debug, Deserialize)]
pub struct GetTransactionRequest {
    /// The transaction to fetch.
    pub id: TransactionId,
}

/// The request body for title suggestions.
#[derive(Debug, Deserialize)]
pub struct TitleSuggestionsRequest {
    /// The start of the title typed so far.
    #[serde(default)]
    pub prefix: String,
}

/// The response body for title suggestions.
#[derive(Debug, Serialize)]
pub struct TitleSuggestionsResponse {
    /// Matching titles, most recently used first.
    pub titles: Vec<String>,
}

/// Handle transaction creation.
pub async fn create_transaction_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<Json<Transaction>, Error> {
    auth.require_user()?;
    let context = PostingContext::new(&state.config, &state.rules, now_utc());
    let mut connection = state.db.write()?;

    create_transaction(request, context, &mut connection).map(Json)
}

/// Handle creating several transactions in one database transaction.
pub async fn create_transactions_bulk_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateTransactionsBulkRequest>,
) -> Result<Json<Vec<Transaction>>, Error> {
    auth.require_user()?;
    let context = PostingContext::new(&state.config, &state.rules, now_utc());
    let mut connection = state.db.write()?;

    create_transactions_bulk(request.transactions, context, &mut connection).map(Json)
}

/// Handle transaction updates.
pub async fn update_transaction_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<UpdateTransactionRequest>,
) -> Result<Json<Transaction>, Error> {
    auth.require_user()?;
    let context = PostingContext::new(&state.config, &state.rules, now_utc());
    let mut connection = state.db.write()?;

    update_transaction(request, context, &mut connection).map(Json)
}

/// Handle transaction deletion.
pub async fn delete_transactions_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<DeleteTransactionsRequest>,
) -> Result<Json<()>, Error> {
    auth.require_user()?;
    let mut connection = state.db.write()?;

    delete_transactions(&request.ids, now_utc(), &mut connection).map(Json)
}

/// Fetch a single transaction.
pub async fn get_transaction_endpoint(
    State(state): State<AppState>,
    Json(request): Json<GetTransactionRequest>,
) -> Result<Json<Transaction>, Error> {
    let connection = state.db.read()?;

    get_transaction(request.id, &connection).map(Json)
}

/// List transactions matching a filter.
pub async fn list_transactions_endpoint(
    State(state): State<AppState>,
    Json(filter): Json<TransactionFilter>,
) -> Result<Json<TransactionPage>, Error> {
    let connection = state.db.read()?;

    list_transactions(&filter, &connection).map(Json)
}

/// Suggest titles for the transaction form.
pub async fn get_title_suggestions_endpoint(
    State(state): State<AppState>,
    Json(request): Json<TitleSuggestionsRequest>,
) -> Result<Json<TitleSuggestionsResponse>, Error> {
    let connection = state.db.read()?;

    get_title_suggestions(&request.prefix, &connection)
        .map(|titles| Json(TitleSuggestionsResponse { titles }))
}
