//! Jobs that rebuild derived data: base currency amounts and daily balance snapshots.

use std::collections::BTreeMap;

use axum::{Extension, Json, extract::State};
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    AppState, Error, ErrorContext,
    account::AccountId,
    auth::AuthContext,
    clock::now_utc,
    db::with_write_transaction,
    decimal::get_decimal,
    transaction::{
        TRANSACTION_COLUMNS, Transaction, compute_base_amounts, delete_double_entries,
        insert_double_entries, map_transaction_row,
    },
};

/// How many rows a maintenance job handles per batch.
pub const BATCH_SIZE: usize = 500;

/// The balance of an account at the end of a day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBalance {
    /// The account the snapshot belongs to.
    pub account_id: AccountId,
    /// The UTC day of the snapshot.
    pub date: Date,
    /// The signed ledger sum, debits positive, in the account's currency.
    pub balance: Decimal,
}

/// What a gap fill did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GapFillSummary {
    /// Accounts that have ledger rows.
    pub accounts: usize,
    /// Snapshots that were missing and have been written.
    pub inserted: usize,
}

/// Create the daily_balance table.
pub fn create_daily_balance_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS daily_balance (
            account_id INTEGER NOT NULL REFERENCES account(id),
            date TEXT NOT NULL,
            balance TEXT NOT NULL,
            PRIMARY KEY (account_id, date)
        );",
    )?;

    Ok(())
}

/// The ledger movements of an account grouped by UTC day, and the balance before `from`.
fn daily_movements(
    account_id: AccountId,
    from: Option<Date>,
    connection: &Connection,
) -> Result<(Decimal, BTreeMap<Date, Decimal>), Error> {
    let mut opening = Decimal::ZERO;
    let mut movements: BTreeMap<Date, Decimal> = BTreeMap::new();

    let mut statement = connection.prepare(
        "SELECT substr(created_at, 1, 10), amount FROM double_entry
         WHERE account_id = ?1 AND deleted_at IS NULL",
    )?;
    let rows = statement.query_map([account_id], |row| {
        let day: Date = row.get(0)?;
        Ok((day, get_decimal(row, 1)?))
    })?;

    for row in rows {
        let (day, amount) = row?;
        match from {
            Some(from) if day < from => opening += amount,
            _ => *movements.entry(day).or_default() += amount,
        }
    }

    Ok((opening, movements))
}

/// The snapshots of every day from `start` through `end` given the balance before `start`.
fn running_balances(
    account_id: AccountId,
    start: Date,
    end: Date,
    opening: Decimal,
    movements: &BTreeMap<Date, Decimal>,
) -> Vec<DailyBalance> {
    let mut balances = Vec::new();
    let mut balance = opening;
    let mut day = start;

    while day <= end {
        balance += movements.get(&day).copied().unwrap_or_default();
        balances.push(DailyBalance {
            account_id,
            date: day,
            balance,
        });

        match day.next_day() {
            Some(next) => day = next,
            None => break,
        }
    }

    balances
}

/// Rewrite the snapshots of an account from `from` onwards.
///
/// Snapshots are written for every day from the later of `from` and the account's first ledger
/// day through the later of `today` and its last ledger day.
pub fn refresh_daily_balances(
    account_id: AccountId,
    from: Date,
    today: Date,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "DELETE FROM daily_balance WHERE account_id = ?1 AND date >= ?2",
        (account_id, from),
    )?;

    let (opening, movements) = daily_movements(account_id, Some(from), connection)?;

    let has_history = connection
        .prepare(
            "SELECT 1 FROM double_entry
             WHERE account_id = ?1 AND deleted_at IS NULL AND substr(created_at, 1, 10) < ?2",
        )?
        .exists((account_id, from))?;

    let start = if has_history {
        from
    } else {
        match movements.keys().next() {
            Some(first) => *first,
            None => return Ok(()),
        }
    };
    let end = movements
        .keys()
        .next_back()
        .copied()
        .map_or(today, |last| last.max(today));

    let mut statement = connection.prepare(
        "INSERT OR REPLACE INTO daily_balance (account_id, date, balance) VALUES (?1, ?2, ?3)",
    )?;
    for snapshot in running_balances(account_id, start, end, opening, &movements) {
        statement.execute((
            snapshot.account_id,
            snapshot.date,
            snapshot.balance.to_string(),
        ))?;
    }

    Ok(())
}

/// The stored snapshots of an account in `[from, to]`, oldest first.
pub fn get_daily_balances(
    account_id: AccountId,
    from: Date,
    to: Date,
    connection: &Connection,
) -> Result<Vec<DailyBalance>, Error> {
    connection
        .prepare(
            "SELECT account_id, date, balance FROM daily_balance
             WHERE account_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date ASC",
        )?
        .query_map((account_id, from, to), map_daily_balance_row)?
        .map(|maybe_balance| maybe_balance.map_err(|error| error.into()))
        .collect()
}

fn map_daily_balance_row(row: &Row) -> Result<DailyBalance, rusqlite::Error> {
    Ok(DailyBalance {
        account_id: row.get(0)?,
        date: row.get(1)?,
        balance: get_decimal(row, 2)?,
    })
}

/// Write the snapshots missing for any account, from its first ledger day through `today`.
///
/// Existing snapshots are left alone, so running the job twice inserts nothing the second time.
/// Writes are committed in batches of [BATCH_SIZE] rows.
///
/// # Errors
/// Returns the first database error. Batches committed before the error are kept.
pub fn fix_daily_gaps(connection: &mut Connection, today: Date) -> Result<GapFillSummary, Error> {
    let account_ids: Vec<AccountId> = connection
        .prepare(
            "SELECT DISTINCT account_id FROM double_entry WHERE deleted_at IS NULL
             ORDER BY account_id",
        )?
        .query_map([], |row| row.get(0))?
        .collect::<Result<_, _>>()?;

    let mut summary = GapFillSummary {
        accounts: account_ids.len(),
        inserted: 0,
    };

    for account_id in account_ids {
        let (opening, movements) = daily_movements(account_id, None, connection)?;
        let Some(first) = movements.keys().next().copied() else {
            continue;
        };
        let end = movements
            .keys()
            .next_back()
            .copied()
            .map_or(today, |last| last.max(today));

        let mut existing_statement =
            connection.prepare("SELECT date FROM daily_balance WHERE account_id = ?1")?;
        let existing: Vec<Date> = existing_statement
            .query_map([account_id], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(existing_statement);

        let missing: Vec<DailyBalance> =
            running_balances(account_id, first, end, opening, &movements)
                .into_iter()
                .filter(|snapshot| !existing.contains(&snapshot.date))
                .collect();

        for batch in missing.chunks(BATCH_SIZE) {
            with_write_transaction(connection, |transaction| {
                let mut statement = transaction.prepare(
                    "INSERT OR IGNORE INTO daily_balance (account_id, date, balance)
                     VALUES (?1, ?2, ?3)",
                )?;
                for snapshot in batch {
                    statement.execute((
                        snapshot.account_id,
                        snapshot.date,
                        snapshot.balance.to_string(),
                    ))?;
                }

                Ok(())
            })
            .context("failed to fill daily balance gaps")?;

            summary.inserted += batch.len();
            tracing::info!(
                "Filled {} daily balance gaps for account {account_id}",
                batch.len()
            );
        }
    }

    tracing::info!(
        "Daily gap fill checked {} accounts and inserted {} snapshots",
        summary.accounts,
        summary.inserted
    );

    Ok(summary)
}

/// Recompute the base currency amounts of every live transaction with the current rates and
/// regenerate their ledger rows.
///
/// Runs in batches of [BATCH_SIZE] transactions ordered by ID using `connection`, which should be
/// a transaction. Returns the number of transactions rewritten.
pub fn recalculate_amount_in_base_currency_for_all(
    connection: &Connection,
    base_currency: &str,
) -> Result<usize, Error> {
    let mut last_id = 0;
    let mut count = 0;

    loop {
        let batch: Vec<Transaction> = connection
            .prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" t
                 WHERE t.deleted_at IS NULL AND t.id > ?1
                 ORDER BY t.id ASC LIMIT ?2"
            ))?
            .query_map((last_id, BATCH_SIZE as i64), map_transaction_row)?
            .collect::<Result<_, _>>()?;

        let Some(last) = batch.last() else {
            break;
        };
        last_id = last.id;

        for transaction in batch {
            if recalculate_transaction(transaction, base_currency, connection)? {
                count += 1;
            }
        }

        tracing::info!("Recalculated base currency amounts of {count} transactions so far");
    }

    Ok(count)
}

/// Recompute a single transaction. Returns false if it has an incomplete side.
fn recalculate_transaction(
    mut transaction: Transaction,
    base_currency: &str,
    connection: &Connection,
) -> Result<bool, Error> {
    let (
        Some(source_amount),
        Some(source_currency),
        Some(destination_amount),
        Some(destination_currency),
    ) = (
        transaction.source_amount,
        transaction.source_currency.clone(),
        transaction.destination_amount,
        transaction.destination_currency.clone(),
    )
    else {
        tracing::warn!(
            "Skipping transaction {} with an incomplete side",
            transaction.id
        );
        return Ok(false);
    };

    let (source_base, destination_base) = compute_base_amounts(
        (source_amount, &source_currency),
        (destination_amount, &destination_currency),
        base_currency,
        connection,
    )?;

    connection.execute(
        "UPDATE \"transaction\"
         SET source_amount_in_base_currency = ?1, destination_amount_in_base_currency = ?2
         WHERE id = ?3",
        (
            source_base.to_string(),
            destination_base.to_string(),
            transaction.id,
        ),
    )?;

    transaction.source_amount_in_base_currency = Some(source_base);
    transaction.destination_amount_in_base_currency = Some(destination_base);

    delete_double_entries(transaction.id, connection)?;
    insert_double_entries(&transaction, base_currency, connection)?;

    Ok(true)
}

/// Run [recalculate_amount_in_base_currency_for_all] in its own database transaction.
pub fn recalculate_all(connection: &mut Connection, base_currency: &str) -> Result<usize, Error> {
    with_write_transaction(connection, |transaction| {
        recalculate_amount_in_base_currency_for_all(transaction, base_currency)
    })
    .context("failed to recalculate base currency amounts")
}

/// The most recent snapshot of an account on or before `date`.
pub fn get_balance_snapshot(
    account_id: AccountId,
    date: Date,
    connection: &Connection,
) -> Result<Option<DailyBalance>, Error> {
    connection
        .prepare(
            "SELECT account_id, date, balance FROM daily_balance
             WHERE account_id = ?1 AND date <= ?2
             ORDER BY date DESC LIMIT 1",
        )?
        .query_row((account_id, date), map_daily_balance_row)
        .optional()
        .map_err(|error| error.into())
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// The request body for listing daily balances.
#[derive(Debug, Deserialize)]
pub struct DailyBalancesRequest {
    /// The account to list snapshots of.
    pub account_id: AccountId,
    /// The first day, inclusive.
    pub from: Date,
    /// The last day, inclusive.
    pub to: Date,
}

/// The number of transactions a recalculation rewrote.
#[derive(Debug, Serialize)]
pub struct RecalculateResponse {
    /// Transactions whose base currency amounts were recomputed.
    pub recalculated: usize,
}

/// Recompute every base currency amount with the current rates.
pub async fn recalculate_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<RecalculateResponse>, Error> {
    auth.require_user()?;
    let mut connection = state.db.write()?;

    let recalculated = recalculate_all(&mut connection, &state.config.base_currency)?;

    Ok(Json(RecalculateResponse { recalculated }))
}

/// Fill missing daily balance snapshots through today.
pub async fn fix_daily_gaps_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<GapFillSummary>, Error> {
    auth.require_user()?;
    let mut connection = state.db.write()?;

    fix_daily_gaps(&mut connection, now_utc().date()).map(Json)
}

/// List the daily balance snapshots of an account.
pub async fn get_daily_balances_endpoint(
    State(state): State<AppState>,
    Json(request): Json<DailyBalancesRequest>,
) -> Result<Json<Vec<DailyBalance>>, Error> {
    if request.from > request.to {
        return Err(Error::InvalidArgument(
            "from must not be after to".to_owned(),
        ));
    }

    let connection = state.db.read()?;

    get_daily_balances(request.account_id, request.from, request.to, &connection).map(Json)
}

#[cfg(test)]
mod daily_balance_tests {
    use rusqlite::Connection;
    use time::macros::{date, datetime};

    use crate::{
        Config,
        account::{AccountId, DefaultAccount, get_default_account},
        rule::RuleEngine,
        test_utils::{dec, get_test_connection},
        transaction::{CreateTransactionRequest, PostingContext, TransactionType, create_transaction},
    };

    use super::{fix_daily_gaps, get_balance_snapshot, get_daily_balances};

    fn cash(connection: &Connection) -> AccountId {
        get_default_account(DefaultAccount::Cash, connection).unwrap().id
    }

    fn deposit(connection: &mut Connection, amount: &str, at: time::OffsetDateTime) {
        let config = Config::default();
        let engine = RuleEngine::new();
        let request = CreateTransactionRequest::new(TransactionType::Deposit, at)
            .destination(cash(connection))
            .destination_amount(dec(amount), "USD");

        create_transaction(
            request,
            PostingContext::new(&config, &engine, datetime!(2025-03-05 12:00 UTC)),
            connection,
        )
        .unwrap();
    }

    #[test]
    fn creating_transactions_refreshes_snapshots() {
        let mut connection = get_test_connection();
        deposit(&mut connection, "10", datetime!(2025-03-01 9:00 UTC));
        deposit(&mut connection, "5", datetime!(2025-03-03 9:00 UTC));

        let balances = get_daily_balances(
            cash(&connection),
            date!(2025-03-01),
            date!(2025-03-05),
            &connection,
        )
        .unwrap();

        let values: Vec<_> = balances.iter().map(|balance| balance.balance).collect();
        assert_eq!(values, vec![dec("10"), dec("10"), dec("15"), dec("15"), dec("15")]);
    }

    #[test]
    fn backdated_transaction_rewrites_later_snapshots() {
        let mut connection = get_test_connection();
        deposit(&mut connection, "10", datetime!(2025-03-03 9:00 UTC));
        deposit(&mut connection, "1", datetime!(2025-03-01 9:00 UTC));

        let snapshot = get_balance_snapshot(cash(&connection), date!(2025-03-04), &connection)
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.balance, dec("11"));
    }

    #[test]
    fn gap_fill_inserts_missing_days_once() {
        let mut connection = get_test_connection();
        deposit(&mut connection, "10", datetime!(2025-03-01 9:00 UTC));
        connection
            .execute("DELETE FROM daily_balance WHERE date = '2025-03-02'", [])
            .unwrap();

        let first = fix_daily_gaps(&mut connection, date!(2025-03-05)).unwrap();
        let second = fix_daily_gaps(&mut connection, date!(2025-03-05)).unwrap();

        assert_eq!(first.inserted, 1);
        assert_eq!(second.inserted, 0);
        let snapshot = get_balance_snapshot(cash(&connection), date!(2025-03-02), &connection)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.date, date!(2025-03-02));
        assert_eq!(snapshot.balance, dec("10"));
    }
}

#[cfg(test)]
mod recalculate_tests {
    use time::macros::datetime;

    use crate::{
        Config,
        account::{AccountType, NewAccount, create_account},
        Error,
        currency::{CurrencyData, create_currency, delete_currency, update_currency},
        rule::RuleEngine,
        test_utils::{dec, get_test_connection},
        transaction::{
            CreateTransactionRequest, PostingContext, TransactionType, create_transaction,
            get_double_entries, get_transaction,
        },
    };

    use super::recalculate_all;

    #[test]
    fn base_amounts_follow_new_rates() {
        let mut connection = get_test_connection();
        let now = datetime!(2025-04-01 12:00 UTC);
        let euro = |rate: &str| CurrencyData {
            id: "EUR".to_owned(),
            rate: dec(rate),
            decimal_places: 2,
            is_active: true,
        };
        create_currency(euro("0.85"), "USD", now, &connection).unwrap();
        let checking =
            create_account(NewAccount::new("Giro", AccountType::Asset, "EUR"), now, &connection)
                .unwrap();
        let savings =
            create_account(NewAccount::new("Tagesgeld", AccountType::Asset, "EUR"), now, &connection)
                .unwrap();
        let config = Config::default();
        let engine = RuleEngine::new();
        let request = CreateTransactionRequest::new(TransactionType::TransferBetweenAccounts, now)
            .source(checking.id)
            .source_amount(dec("85"), "EUR")
            .destination(savings.id);
        let transaction =
            create_transaction(request, PostingContext::new(&config, &engine, now), &mut connection)
                .unwrap();
        assert_eq!(transaction.source_amount_in_base_currency, Some(dec("100")));

        update_currency(euro("0.90"), "USD", now, &connection).unwrap();
        let count = recalculate_all(&mut connection, "USD").unwrap();

        assert_eq!(count, 1);
        let updated = get_transaction(transaction.id, &connection).unwrap();
        assert_eq!(updated.source_amount_in_base_currency, Some(dec("94.44")));
        assert_eq!(updated.destination_amount_in_base_currency, Some(dec("94.44")));
        let entries = get_double_entries(transaction.id, &connection).unwrap();
        assert_eq!(entries[0].amount_in_base_currency, dec("94.44"));
        assert_eq!(entries[1].amount_in_base_currency, dec("-94.44"));
    }

    #[test]
    fn currency_of_posted_transfer_cannot_be_deleted() {
        let mut connection = get_test_connection();
        let now = datetime!(2025-04-01 12:00 UTC);
        let euro = CurrencyData {
            id: "EUR".to_owned(),
            rate: dec("0.85"),
            decimal_places: 2,
            is_active: true,
        };
        create_currency(euro, "USD", now, &connection).unwrap();
        let checking =
            create_account(NewAccount::new("Giro", AccountType::Asset, "EUR"), now, &connection)
                .unwrap();
        let savings =
            create_account(NewAccount::new("Tagesgeld", AccountType::Asset, "EUR"), now, &connection)
                .unwrap();
        let config = Config::default();
        let engine = RuleEngine::new();
        let request = CreateTransactionRequest::new(TransactionType::TransferBetweenAccounts, now)
            .source(checking.id)
            .source_amount(dec("85"), "EUR")
            .destination(savings.id);
        create_transaction(request, PostingContext::new(&config, &engine, now), &mut connection)
            .unwrap();

        let result = delete_currency("EUR", "USD", now, &connection);

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(recalculate_all(&mut connection, "USD"), Ok(1));
    }
}
