//! The two-row debit/credit ledger kept alongside every transaction.

use rusqlite::{Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    account::AccountId,
    database_id::{DatabaseId, TransactionId},
    decimal::get_decimal,
    transaction::Transaction,
};

/// One side of a transaction in the ledger.
///
/// Debits carry positive amounts and credits negative ones, so the rows of a transaction sum to
/// zero in the base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoubleEntry {
    /// The ID of the row.
    pub id: DatabaseId,
    /// The transaction the row belongs to.
    pub transaction_id: TransactionId,
    /// The account the row moves money in or out of.
    pub account_id: AccountId,
    /// Whether this is the debit row.
    pub is_debit: bool,
    /// The signed amount in `currency`.
    pub amount: Decimal,
    /// The currency of the account.
    pub currency: String,
    /// The signed amount in `base_currency`.
    pub amount_in_base_currency: Decimal,
    /// The base currency at the time the row was written.
    pub base_currency: String,
    /// The transaction date of the parent transaction.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the parent transaction was deleted.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

/// A ledger row that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDoubleEntry {
    /// The account the row moves money in or out of.
    pub account_id: AccountId,
    /// Whether this is the debit row.
    pub is_debit: bool,
    /// The signed amount in `currency`.
    pub amount: Decimal,
    /// The currency of the account.
    pub currency: String,
    /// The signed amount in the base currency.
    pub amount_in_base_currency: Decimal,
}

/// Create the double_entry table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_double_entry_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS double_entry (
            id INTEGER PRIMARY KEY,
            transaction_id INTEGER NOT NULL REFERENCES \"transaction\"(id) ON DELETE CASCADE,
            account_id INTEGER NOT NULL REFERENCES account(id),
            is_debit INTEGER NOT NULL,
            amount TEXT NOT NULL,
            currency TEXT NOT NULL,
            amount_in_base_currency TEXT NOT NULL,
            base_currency TEXT NOT NULL,
            created_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_double_entry_transaction
            ON double_entry(transaction_id);
        CREATE INDEX IF NOT EXISTS idx_double_entry_account_date
            ON double_entry(account_id, created_at);",
    )?;

    Ok(())
}

/// Build the debit and credit rows for `transaction`.
///
/// The destination is debited and the source credited. Both rows use one base amount, the
/// destination's when the destination is kept in the base currency and the source's otherwise, so
/// that the pair sums to exactly zero.
///
/// # Errors
/// Returns [Error::InvalidArgument] if either side of the transaction is incomplete.
pub fn build_entry_pair(
    transaction: &Transaction,
    base_currency: &str,
) -> Result<[NewDoubleEntry; 2], Error> {
    let incomplete =
        || Error::InvalidArgument(format!("transaction {} has an incomplete side", transaction.id));

    let source_account_id = transaction.source_account_id.ok_or_else(incomplete)?;
    let source_amount = transaction.source_amount.ok_or_else(incomplete)?;
    let source_currency = transaction.source_currency.clone().ok_or_else(incomplete)?;
    let source_base = transaction
        .source_amount_in_base_currency
        .ok_or_else(incomplete)?;

    let destination_account_id = transaction.destination_account_id.ok_or_else(incomplete)?;
    let destination_amount = transaction.destination_amount.ok_or_else(incomplete)?;
    let destination_currency = transaction
        .destination_currency
        .clone()
        .ok_or_else(incomplete)?;
    let destination_base = transaction
        .destination_amount_in_base_currency
        .ok_or_else(incomplete)?;

    let canonical_base = if destination_currency == base_currency {
        destination_base
    } else {
        source_base
    };

    Ok([
        NewDoubleEntry {
            account_id: destination_account_id,
            is_debit: true,
            amount: destination_amount,
            currency: destination_currency,
            amount_in_base_currency: canonical_base,
        },
        NewDoubleEntry {
            account_id: source_account_id,
            is_debit: false,
            amount: -source_amount,
            currency: source_currency,
            amount_in_base_currency: -canonical_base,
        },
    ])
}

/// Write the ledger rows of `transaction`.
pub fn insert_double_entries(
    transaction: &Transaction,
    base_currency: &str,
    connection: &Connection,
) -> Result<(), Error> {
    let mut statement = connection.prepare(
        "INSERT INTO double_entry
            (transaction_id, account_id, is_debit, amount, currency, amount_in_base_currency,
             base_currency, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;

    for entry in build_entry_pair(transaction, base_currency)? {
        statement.execute((
            transaction.id,
            entry.account_id,
            entry.is_debit,
            entry.amount.to_string(),
            &entry.currency,
            entry.amount_in_base_currency.to_string(),
            base_currency,
            transaction.transaction_date,
        ))?;
    }

    Ok(())
}

/// Remove the ledger rows of a transaction so that they can be regenerated.
pub fn delete_double_entries(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "DELETE FROM double_entry WHERE transaction_id = ?1",
        [transaction_id],
    )?;

    Ok(())
}

/// Give the live ledger rows of a transaction the same tombstone as the transaction.
pub fn tombstone_double_entries(
    transaction_id: TransactionId,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "UPDATE double_entry SET deleted_at = ?1 WHERE transaction_id = ?2 AND deleted_at IS NULL",
        (now, transaction_id),
    )?;

    Ok(())
}

/// The live ledger rows of a transaction, debit first.
pub fn get_double_entries(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Vec<DoubleEntry>, Error> {
    connection
        .prepare(
            "SELECT id, transaction_id, account_id, is_debit, amount, currency,
                    amount_in_base_currency, base_currency, created_at, deleted_at
             FROM double_entry
             WHERE transaction_id = ?1 AND deleted_at IS NULL
             ORDER BY is_debit DESC, id ASC",
        )?
        .query_map([transaction_id], map_double_entry_row)?
        .map(|maybe_entry| maybe_entry.map_err(|error| error.into()))
        .collect()
}

fn map_double_entry_row(row: &Row) -> Result<DoubleEntry, rusqlite::Error> {
    Ok(DoubleEntry {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        account_id: row.get(2)?,
        is_debit: row.get(3)?,
        amount: get_decimal(row, 4)?,
        currency: row.get(5)?,
        amount_in_base_currency: get_decimal(row, 6)?,
        base_currency: row.get(7)?,
        created_at: row.get(8)?,
        deleted_at: row.get(9)?,
    })
}
