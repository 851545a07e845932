//! Aggregations over the double-entry ledger.

use std::collections::HashMap;

use axum::{Json, extract::State};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    account::{AccountId, get_account},
    clock::{normalize, now_utc},
    db::placeholders,
    decimal::get_decimal,
};

/// The debits and credits of one account in a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebitsAndCredits {
    /// The account the totals are for.
    pub account_id: AccountId,
    /// How many debit rows fall in the window.
    pub debit_count: i64,
    /// The sum of the debit rows in the base currency.
    pub debit_amount_in_base_currency: Decimal,
    /// How many credit rows fall in the window.
    pub credit_count: i64,
    /// The sum of the credit rows in the base currency, as a positive number.
    pub credit_amount_in_base_currency: Decimal,
}

impl DebitsAndCredits {
    fn empty(account_id: AccountId) -> Self {
        Self {
            account_id,
            debit_count: 0,
            debit_amount_in_base_currency: Decimal::ZERO,
            credit_count: 0,
            credit_amount_in_base_currency: Decimal::ZERO,
        }
    }
}

/// The balance of an account at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    /// The account the balance is for.
    pub account_id: AccountId,
    /// The currency of the account.
    pub currency: String,
    /// The balance in the account's currency.
    pub amount: Decimal,
    /// The balance in the base currency.
    pub amount_in_base_currency: Decimal,
    /// The instant the balance was taken at.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// Count and sum the debits and credits of each account in `[start_at, end_at]`.
///
/// Every requested account gets a row, in the order given, even when it has no activity.
///
/// # Errors
/// Returns [Error::InvalidArgument] if `account_ids` is empty or `start_at` is after `end_at`.
pub fn get_debits_and_credits_summary(
    account_ids: &[AccountId],
    start_at: OffsetDateTime,
    end_at: OffsetDateTime,
    connection: &Connection,
) -> Result<Vec<DebitsAndCredits>, Error> {
    if account_ids.is_empty() {
        return Err(Error::InvalidArgument(
            "at least one account ID is required".to_owned(),
        ));
    }

    if start_at > end_at {
        return Err(Error::InvalidArgument(format!(
            "the range start {start_at} is after its end {end_at}"
        )));
    }

    let query = format!(
        "SELECT account_id, is_debit, amount_in_base_currency FROM double_entry
         WHERE deleted_at IS NULL AND created_at >= ? AND created_at <= ?
           AND account_id IN ({})",
        placeholders(account_ids.len())
    );

    let mut params: Vec<&dyn rusqlite::ToSql> = vec![&start_at, &end_at];
    params.extend(account_ids.iter().map(|id| id as &dyn rusqlite::ToSql));

    let mut totals: HashMap<AccountId, DebitsAndCredits> = HashMap::new();
    let mut statement = connection.prepare(&query)?;
    let rows = statement.query_map(params.as_slice(), |row| {
        Ok((
            row.get::<_, AccountId>(0)?,
            row.get::<_, bool>(1)?,
            get_decimal(row, 2)?,
        ))
    })?;

    for row in rows {
        let (account_id, is_debit, amount) = row?;
        let total = totals
            .entry(account_id)
            .or_insert_with(|| DebitsAndCredits::empty(account_id));

        if is_debit {
            total.debit_count += 1;
            total.debit_amount_in_base_currency += amount.abs();
        } else {
            total.credit_count += 1;
            total.credit_amount_in_base_currency += amount.abs();
        }
    }

    Ok(account_ids
        .iter()
        .map(|account_id| {
            totals
                .get(account_id)
                .cloned()
                .unwrap_or_else(|| DebitsAndCredits::empty(*account_id))
        })
        .collect())
}

/// The balance of an account from its live ledger rows dated at or before `at`.
///
/// Asset and expense accounts count debits as positive, the other account types count credits
/// as positive.
///
/// # Errors
/// Returns [Error::NotFound] if the account does not exist.
pub fn get_balance(
    account_id: AccountId,
    at: OffsetDateTime,
    connection: &Connection,
) -> Result<Balance, Error> {
    let account = get_account(account_id, connection)?;

    let mut amount = Decimal::ZERO;
    let mut amount_in_base_currency = Decimal::ZERO;

    let mut statement = connection.prepare(
        "SELECT amount, amount_in_base_currency FROM double_entry
         WHERE account_id = ?1 AND deleted_at IS NULL AND created_at <= ?2",
    )?;
    let rows = statement.query_map((account_id, at), |row| {
        Ok((get_decimal(row, 0)?, get_decimal(row, 1)?))
    })?;

    for row in rows {
        let (row_amount, row_base) = row?;
        amount += row_amount;
        amount_in_base_currency += row_base;
    }

    if !account.account_type.is_debit_normal() {
        amount = -amount;
        amount_in_base_currency = -amount_in_base_currency;
    }

    Ok(Balance {
        account_id,
        currency: account.currency,
        amount,
        amount_in_base_currency,
        at,
    })
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// The request body for the debit and credit summary.
#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    /// The accounts to summarise.
    pub account_ids: Vec<AccountId>,
    /// The start of the window, inclusive.
    #[serde(with = "time::serde::rfc3339")]
    pub start_at: OffsetDateTime,
    /// The end of the window, inclusive.
    #[serde(with = "time::serde::rfc3339")]
    pub end_at: OffsetDateTime,
}

/// The request body for a balance.
#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    /// The account to take the balance of.
    pub account_id: AccountId,
    /// When to take the balance, now if missing.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub at: Option<OffsetDateTime>,
}

/// Handle debit and credit summary requests.
pub async fn get_debits_and_credits_summary_endpoint(
    State(state): State<AppState>,
    Json(request): Json<SummaryRequest>,
) -> Result<Json<Vec<DebitsAndCredits>>, Error> {
    let connection = state.db.read()?;

    get_debits_and_credits_summary(
        &request.account_ids,
        normalize(request.start_at),
        normalize(request.end_at),
        &connection,
    )
    .map(Json)
}

/// Handle balance requests.
pub async fn get_balance_endpoint(
    State(state): State<AppState>,
    Json(request): Json<BalanceRequest>,
) -> Result<Json<Balance>, Error> {
    let connection = state.db.read()?;
    let at = request.at.map(normalize).unwrap_or_else(now_utc);

    get_balance(request.account_id, at, &connection).map(Json)
}
