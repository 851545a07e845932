//! Defines the core data models and database queries for transactions.

use std::{fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    account::AccountId,
    category::CategoryId,
    database_id::TransactionId,
    decimal::get_optional_decimal,
    tag::TagId,
    transaction_tag::{create_transaction_tag_table, get_transaction_tag_ids},
};

// ============================================================================
// MODELS
// ============================================================================

/// The kind of money movement a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Money leaves an asset or liability for an expense.
    Withdrawal,
    /// Money arrives in an asset or liability from an income.
    Deposit,
    /// Money moves between two assets or liabilities.
    TransferBetweenAccounts,
    /// An account is brought in line with a statement.
    Reconciliation,
    /// A manual correction of an account.
    Adjustment,
}

impl TransactionType {
    /// All transaction types.
    pub const ALL: [TransactionType; 5] = [
        TransactionType::Withdrawal,
        TransactionType::Deposit,
        TransactionType::TransferBetweenAccounts,
        TransactionType::Reconciliation,
        TransactionType::Adjustment,
    ];

    /// The name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Deposit => "deposit",
            TransactionType::TransferBetweenAccounts => "transfer_between_accounts",
            TransactionType::Reconciliation => "reconciliation",
            TransactionType::Adjustment => "adjustment",
        }
    }

    /// Whether amounts may be negative.
    ///
    /// Reconciliations and adjustments can move an account either way, every other type moves a
    /// positive amount from the source to the destination.
    pub fn allows_negative_amounts(&self) -> bool {
        matches!(
            self,
            TransactionType::Reconciliation | TransactionType::Adjustment
        )
    }
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|transaction_type| transaction_type.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown transaction type \"{s}\"")))
    }
}

impl ToSql for TransactionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransactionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

/// A movement of money from a source account to a destination account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The ID of the transaction.
    pub id: TransactionId,
    /// The kind of movement.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Where the money came from.
    pub source_account_id: Option<AccountId>,
    /// How much left the source, in `source_currency`.
    pub source_amount: Option<Decimal>,
    /// The currency of the source account.
    pub source_currency: Option<String>,
    /// `source_amount` in the base currency.
    pub source_amount_in_base_currency: Option<Decimal>,
    /// Where the money went.
    pub destination_account_id: Option<AccountId>,
    /// How much arrived at the destination, in `destination_currency`.
    pub destination_amount: Option<Decimal>,
    /// The currency of the destination account.
    pub destination_currency: Option<String>,
    /// `destination_amount` in the base currency.
    pub destination_amount_in_base_currency: Option<Decimal>,
    /// A short description.
    pub title: String,
    /// Free form notes.
    pub notes: String,
    /// The category the transaction belongs to.
    pub category_id: Option<CategoryId>,
    /// The tags on the transaction in ascending order.
    pub tag_ids: Vec<TagId>,
    /// The hash of the statement row the transaction was imported from.
    pub import_id: Option<i64>,
    /// When the money moved.
    #[serde(with = "time::serde::rfc3339")]
    pub transaction_date: OffsetDateTime,
    /// When the transaction was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the transaction was last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// When the transaction was deleted.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// The columns selected by [map_transaction_row], prefixed with the table alias `t`.
pub const TRANSACTION_COLUMNS: &str = "t.id, t.type, t.source_account_id, t.source_amount, \
    t.source_currency, t.source_amount_in_base_currency, t.destination_account_id, \
    t.destination_amount, t.destination_currency, t.destination_amount_in_base_currency, \
    t.title, t.notes, t.category_id, t.import_id, t.transaction_date, t.created_at, \
    t.updated_at, t.deleted_at";

/// Create the transaction table and the junction table for its tags.
///
/// # Errors
/// Returns an error if the tables cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
            id INTEGER PRIMARY KEY,
            type TEXT NOT NULL,
            source_account_id INTEGER REFERENCES account(id),
            source_amount TEXT,
            source_currency TEXT,
            source_amount_in_base_currency TEXT,
            destination_account_id INTEGER REFERENCES account(id),
            destination_amount TEXT,
            destination_currency TEXT,
            destination_amount_in_base_currency TEXT,
            title TEXT NOT NULL DEFAULT '',
            notes TEXT NOT NULL DEFAULT '',
            category_id INTEGER REFERENCES category(id),
            import_id INTEGER UNIQUE,
            transaction_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_transaction_date
            ON \"transaction\"(transaction_date DESC, id DESC);",
    )?;

    create_transaction_tag_table(connection)?;

    Ok(())
}

/// Map a row selected with [TRANSACTION_COLUMNS] to a [Transaction] without tags.
pub fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        transaction_type: row.get(1)?,
        source_account_id: row.get(2)?,
        source_amount: get_optional_decimal(row, 3)?,
        source_currency: row.get(4)?,
        source_amount_in_base_currency: get_optional_decimal(row, 5)?,
        destination_account_id: row.get(6)?,
        destination_amount: get_optional_decimal(row, 7)?,
        destination_currency: row.get(8)?,
        destination_amount_in_base_currency: get_optional_decimal(row, 9)?,
        title: row.get(10)?,
        notes: row.get(11)?,
        category_id: row.get(12)?,
        tag_ids: Vec::new(),
        import_id: row.get(13)?,
        transaction_date: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
        deleted_at: row.get(17)?,
    })
}

/// Retrieve a live transaction and its tags.
///
/// # Errors
/// Returns [Error::NotFound] if the transaction does not exist or was deleted.
pub fn get_transaction(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let mut transaction = connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" t
             WHERE t.id = :id AND t.deleted_at IS NULL"
        ))?
        .query_row(&[(":id", &transaction_id)], map_transaction_row)?;

    transaction.tag_ids = get_transaction_tag_ids(transaction_id, connection)?;

    Ok(transaction)
}

/// Whether a transaction was already imported from the statement row with `import_id`.
pub fn import_id_exists(import_id: i64, connection: &Connection) -> Result<bool, Error> {
    connection
        .prepare("SELECT 1 FROM \"transaction\" WHERE import_id = ?1")?
        .exists([import_id])
        .map_err(|error| error.into())
}

/// Count the live transactions.
#[cfg(test)]
pub fn count_transactions(connection: &Connection) -> Result<i64, Error> {
    connection
        .query_row(
            "SELECT COUNT(*) FROM \"transaction\" WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )
        .map_err(|error| error.into())
}

#[cfg(test)]
mod transaction_type_tests {
    use std::str::FromStr;

    use super::TransactionType;

    #[test]
    fn names_round_trip() {
        for transaction_type in TransactionType::ALL {
            assert_eq!(
                TransactionType::from_str(transaction_type.as_str()),
                Ok(transaction_type)
            );
        }
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&TransactionType::TransferBetweenAccounts).unwrap();

        assert_eq!(json, "\"transfer_between_accounts\"");
    }
}
