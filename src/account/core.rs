//! Accounts: where money is held, owed, earned or spent.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use rusqlite::{
    Connection, Row,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    currency::get_currency,
    db::with_write_transaction,
};

// ============================================================================
// MODELS
// ============================================================================

/// Database identifier for an account.
pub type AccountId = i64;

/// Bit set in [Account::flags] for accounts hidden from pickers.
pub const ARCHIVED_FLAG: i64 = 1;

/// What an account represents, which decides the sides of a transaction it may appear on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Money the household holds, e.g. a bank account or cash.
    Asset,
    /// Money the household owes, e.g. a credit card.
    Liability,
    /// Where money comes from, e.g. an employer.
    Income,
    /// Where money goes, e.g. a supermarket.
    Expense,
    /// Balancing account for manual adjustments.
    Adjustment,
    /// Balancing account for reconciling against statements.
    Reconciliation,
}

impl AccountType {
    /// All account types.
    pub const ALL: [AccountType; 6] = [
        AccountType::Asset,
        AccountType::Liability,
        AccountType::Income,
        AccountType::Expense,
        AccountType::Adjustment,
        AccountType::Reconciliation,
    ];

    /// The name stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Asset => "asset",
            AccountType::Liability => "liability",
            AccountType::Income => "income",
            AccountType::Expense => "expense",
            AccountType::Adjustment => "adjustment",
            AccountType::Reconciliation => "reconciliation",
        }
    }

    /// Whether debits increase the balance of this type of account.
    ///
    /// Liabilities and income grow with credits, everything else with debits.
    pub fn is_debit_normal(&self) -> bool {
        !matches!(self, AccountType::Liability | AccountType::Income)
    }
}

impl Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountType::ALL
            .into_iter()
            .find(|account_type| account_type.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown account type \"{s}\"")))
    }
}

impl ToSql for AccountType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AccountType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|error: Error| FromSqlError::Other(Box::new(error)))
    }
}

/// An account that transactions move money between.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// The ID of the account.
    pub id: AccountId,
    /// The display name, unique among live accounts of the same type.
    pub name: String,
    /// What the account represents.
    #[serde(rename = "type")]
    pub account_type: AccountType,
    /// The ISO code of the currency the account is kept in.
    pub currency: String,
    /// Free form key/value data, e.g. a bank account number.
    pub extra: BTreeMap<String, String>,
    /// Display order, lowest first.
    pub position: i64,
    /// Bit flags, see [ARCHIVED_FLAG].
    pub flags: i64,
    /// When the account was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the account was last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// When the account was deleted.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl Account {
    /// Whether the account is hidden from pickers.
    pub fn is_archived(&self) -> bool {
        self.flags & ARCHIVED_FLAG != 0
    }
}

/// The data needed to create an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    /// The display name.
    pub name: String,
    /// What the account represents.
    #[serde(rename = "type")]
    pub account_type: AccountType,
    /// The ISO code of the account's currency.
    pub currency: String,
    /// Free form key/value data.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    /// Display order, defaults to after every other account.
    #[serde(default)]
    pub position: Option<i64>,
    /// Bit flags, see [ARCHIVED_FLAG].
    #[serde(default)]
    pub flags: i64,
}

impl NewAccount {
    /// An account with no extra data, placed after every other account.
    pub fn new(name: &str, account_type: AccountType, currency: &str) -> Self {
        Self {
            name: name.to_owned(),
            account_type,
            currency: currency.to_owned(),
            extra: BTreeMap::new(),
            position: None,
            flags: 0,
        }
    }
}

/// The data needed to update an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdate {
    /// The account to update.
    pub id: AccountId,
    /// The new display name.
    pub name: String,
    /// The new type.
    #[serde(rename = "type")]
    pub account_type: AccountType,
    /// The new currency, only allowed while the account has no transactions.
    pub currency: String,
    /// The new key/value data.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    /// The new display order.
    pub position: i64,
    /// The new bit flags.
    #[serde(default)]
    pub flags: i64,
}

/// The accounts created for every new ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAccount {
    /// "Default Expense", the destination of withdrawals that name none.
    Expense,
    /// "Default Income", the source of deposits that name none.
    Income,
    /// "Default Liability".
    Liability,
    /// "Cash".
    Cash,
    /// "Default Adjustment", the source of adjustments that name none.
    Adjustment,
    /// "Default Reconciliation", the source of reconciliations that name none.
    Reconciliation,
}

impl DefaultAccount {
    const ALL: [DefaultAccount; 6] = [
        DefaultAccount::Expense,
        DefaultAccount::Income,
        DefaultAccount::Liability,
        DefaultAccount::Cash,
        DefaultAccount::Adjustment,
        DefaultAccount::Reconciliation,
    ];

    /// The seeded account name.
    pub fn name(&self) -> &'static str {
        match self {
            DefaultAccount::Expense => "Default Expense",
            DefaultAccount::Income => "Default Income",
            DefaultAccount::Liability => "Default Liability",
            DefaultAccount::Cash => "Cash",
            DefaultAccount::Adjustment => "Default Adjustment",
            DefaultAccount::Reconciliation => "Default Reconciliation",
        }
    }

    /// The seeded account type.
    pub fn account_type(&self) -> AccountType {
        match self {
            DefaultAccount::Expense => AccountType::Expense,
            DefaultAccount::Income => AccountType::Income,
            DefaultAccount::Liability => AccountType::Liability,
            DefaultAccount::Cash => AccountType::Asset,
            DefaultAccount::Adjustment => AccountType::Adjustment,
            DefaultAccount::Reconciliation => AccountType::Reconciliation,
        }
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Initialize the account table and indexes.
pub fn create_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            currency TEXT NOT NULL REFERENCES currency(id),
            extra TEXT NOT NULL DEFAULT '{}',
            position INTEGER NOT NULL DEFAULT 0,
            flags INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_account_name_type
            ON account(name, type) WHERE deleted_at IS NULL;",
    )?;

    Ok(())
}

/// Create the default accounts that are missing, kept in `base_currency`.
pub fn seed_default_accounts(
    base_currency: &str,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let mut statement = connection.prepare(
        "INSERT INTO account (name, type, currency, position, created_at, updated_at)
         SELECT ?1, ?2, ?3, ?4, ?5, ?5
         WHERE NOT EXISTS (
            SELECT 1 FROM account WHERE name = ?1 AND type = ?2 AND deleted_at IS NULL
         )",
    )?;

    for (position, default_account) in DefaultAccount::ALL.iter().enumerate() {
        statement.execute((
            default_account.name(),
            default_account.account_type(),
            base_currency,
            position as i64,
            now,
        ))?;
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<String, Error> {
    let name = name.trim();

    if name.is_empty() {
        Err(Error::InvalidArgument(
            "account name cannot be empty".to_owned(),
        ))
    } else {
        Ok(name.to_owned())
    }
}

fn validate_currency(currency: &str, connection: &Connection) -> Result<String, Error> {
    match get_currency(currency, connection) {
        Ok(currency) => Ok(currency.id),
        Err(Error::NotFound) => Err(Error::InvalidArgument(format!(
            "the currency \"{currency}\" does not exist"
        ))),
        Err(error) => Err(error),
    }
}

fn map_unique_violation(error: rusqlite::Error, name: &str, account_type: AccountType) -> Error {
    match error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: _,
                extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            },
            _,
        ) => Error::DuplicateAccount {
            name: name.to_owned(),
            account_type,
        },
        error => error.into(),
    }
}

/// Create an account.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if the name is empty or the currency does not exist,
/// - [Error::DuplicateAccount] if a live account with the same name and type exists,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_account(
    new_account: NewAccount,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Account, Error> {
    let name = validate_name(&new_account.name)?;
    let currency = validate_currency(&new_account.currency, connection)?;
    let extra = serde_json::to_string(&new_account.extra)?;
    let position = match new_account.position {
        Some(position) => position,
        None => connection.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM account WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?,
    };

    connection
        .execute(
            "INSERT INTO account (name, type, currency, extra, position, flags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            (
                &name,
                new_account.account_type,
                &currency,
                extra,
                position,
                new_account.flags,
                now,
            ),
        )
        .map_err(|error| map_unique_violation(error, &name, new_account.account_type))?;

    let id = connection.last_insert_rowid();
    tracing::info!("Created {} account \"{name}\" with id {id}", new_account.account_type);

    get_account(id, connection)
}

/// Create several accounts, either all of them or none.
///
/// # Errors
/// Returns the first error from [create_account], in which case no account is created.
pub fn create_accounts_bulk(
    new_accounts: Vec<NewAccount>,
    now: OffsetDateTime,
    connection: &mut Connection,
) -> Result<Vec<Account>, Error> {
    with_write_transaction(connection, |transaction| {
        new_accounts
            .iter()
            .cloned()
            .map(|new_account| create_account(new_account, now, transaction))
            .collect()
    })
}

/// Update a live account.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if there is no live account with the ID,
/// - [Error::InvalidArgument] if the name is empty, the currency does not exist, or the currency
///   changes while the account has transactions,
/// - [Error::DuplicateAccount] if the new name and type collide with another live account,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_account(
    update: AccountUpdate,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Account, Error> {
    let existing = get_account(update.id, connection)?;
    let name = validate_name(&update.name)?;
    let currency = validate_currency(&update.currency, connection)?;

    if currency != existing.currency && account_has_entries(update.id, connection)? {
        return Err(Error::InvalidArgument(format!(
            "the currency of account {} cannot change while it has transactions",
            update.id
        )));
    }

    let extra = serde_json::to_string(&update.extra)?;

    connection
        .execute(
            "UPDATE account
             SET name = ?1, type = ?2, currency = ?3, extra = ?4, position = ?5, flags = ?6,
                 updated_at = ?7
             WHERE id = ?8 AND deleted_at IS NULL",
            (
                &name,
                update.account_type,
                &currency,
                extra,
                update.position,
                update.flags,
                now,
                update.id,
            ),
        )
        .map_err(|error| map_unique_violation(error, &name, update.account_type))?;

    get_account(update.id, connection)
}

/// Soft delete an account. Existing transactions keep referring to it.
///
/// # Errors
/// Returns [Error::NotFound] if there is no live account with the ID.
pub fn delete_account(
    account_id: AccountId,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE account SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        (now, account_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    tracing::info!("Deleted account {account_id}");

    Ok(())
}

/// Rewrite the display order of the live accounts.
///
/// The accounts in `ordered_ids` come first, in that order, followed by the remaining accounts
/// in their previous order.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if an ID is repeated,
/// - [Error::NotFound] if an ID is not a live account,
/// - or [Error::SqlError] if there is some other SQL error, in which case nothing changes.
pub fn reorder_accounts(
    ordered_ids: &[AccountId],
    now: OffsetDateTime,
    connection: &mut Connection,
) -> Result<Vec<Account>, Error> {
    with_write_transaction(connection, |transaction| {
        let current: Vec<AccountId> = list_accounts(false, transaction)?
            .into_iter()
            .map(|account| account.id)
            .collect();

        let mut order = Vec::with_capacity(current.len());
        for id in ordered_ids {
            if order.contains(id) {
                return Err(Error::InvalidArgument(format!(
                    "account {id} appears more than once"
                )));
            }
            if !current.contains(id) {
                return Err(Error::NotFound);
            }
            order.push(*id);
        }
        order.extend(current.iter().filter(|id| !ordered_ids.contains(id)));

        let mut statement =
            transaction.prepare("UPDATE account SET position = ?1, updated_at = ?2 WHERE id = ?3")?;
        for (position, id) in order.iter().enumerate() {
            statement.execute((position as i64, now, id))?;
        }

        list_accounts(false, transaction)
    })
}

/// Retrieve a live account by ID.
///
/// # Errors
/// Returns [Error::NotFound] if the account does not exist or was deleted.
pub fn get_account(account_id: AccountId, connection: &Connection) -> Result<Account, Error> {
    connection
        .prepare(
            "SELECT id, name, type, currency, extra, position, flags, created_at, updated_at, deleted_at
             FROM account WHERE id = :id AND deleted_at IS NULL",
        )?
        .query_row(&[(":id", &account_id)], map_account_row)
        .map_err(|error| error.into())
}

/// Retrieve one of the seeded accounts.
///
/// # Errors
/// Returns [Error::NotFound] if the account was deleted.
pub fn get_default_account(
    default_account: DefaultAccount,
    connection: &Connection,
) -> Result<Account, Error> {
    connection
        .prepare(
            "SELECT id, name, type, currency, extra, position, flags, created_at, updated_at, deleted_at
             FROM account WHERE name = ?1 AND type = ?2 AND deleted_at IS NULL",
        )?
        .query_row(
            (default_account.name(), default_account.account_type()),
            map_account_row,
        )
        .map_err(|error| error.into())
}

/// Retrieve accounts ordered by position.
pub fn list_accounts(include_deleted: bool, connection: &Connection) -> Result<Vec<Account>, Error> {
    let query = if include_deleted {
        "SELECT id, name, type, currency, extra, position, flags, created_at, updated_at, deleted_at
         FROM account ORDER BY position ASC, id ASC"
    } else {
        "SELECT id, name, type, currency, extra, position, flags, created_at, updated_at, deleted_at
         FROM account WHERE deleted_at IS NULL ORDER BY position ASC, id ASC"
    };

    connection
        .prepare(query)?
        .query_map([], map_account_row)?
        .map(|maybe_account| maybe_account.map_err(|error| error.into()))
        .collect()
}

fn account_has_entries(account_id: AccountId, connection: &Connection) -> Result<bool, Error> {
    connection
        .prepare("SELECT 1 FROM double_entry WHERE account_id = ?1 AND deleted_at IS NULL LIMIT 1")?
        .exists([account_id])
        .map_err(|error| error.into())
}

/// Map a row selected with the columns of [get_account] to an [Account].
pub fn map_account_row(row: &Row) -> Result<Account, rusqlite::Error> {
    let raw_extra: String = row.get(4)?;
    let extra = serde_json::from_str(&raw_extra).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(error))
    })?;

    Ok(Account {
        id: row.get(0)?,
        name: row.get(1)?,
        account_type: row.get(2)?,
        currency: row.get(3)?,
        extra,
        position: row.get(5)?,
        flags: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        deleted_at: row.get(9)?,
    })
}

#[cfg(test)]
mod account_type_tests {
    use std::str::FromStr;

    use super::AccountType;

    #[test]
    fn round_trips_through_names() {
        for account_type in AccountType::ALL {
            assert_eq!(AccountType::from_str(account_type.as_str()), Ok(account_type));
        }
    }

    #[test]
    fn normal_side_follows_account_type() {
        assert!(AccountType::Asset.is_debit_normal());
        assert!(AccountType::Expense.is_debit_normal());
        assert!(!AccountType::Liability.is_debit_normal());
        assert!(!AccountType::Income.is_debit_normal());
    }
}
