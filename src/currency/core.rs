//! Currencies, their exchange rates and conversions between them.
//!
//! Every rate is relative to the base currency, which has a rate of exactly one. A rate of 0.8
//! for EUR means one unit of the base currency buys 0.8 EUR.

use rusqlite::{Connection, Row, params_from_iter};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    db::placeholders,
    decimal::{format_decimal, get_decimal},
};

// ============================================================================
// MODELS
// ============================================================================

/// The most decimal places a currency may use.
pub const MAX_DECIMAL_PLACES: u32 = 18;

/// A currency and its exchange rate against the base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    /// The ISO code, e.g. "USD".
    pub id: String,
    /// How much of this currency one unit of the base currency buys.
    pub rate: Decimal,
    /// The number of digits shown after the decimal point.
    pub decimal_places: u32,
    /// Inactive currencies cannot be used by new transactions.
    pub is_active: bool,
    /// When the currency or its rate last changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// When the currency was deleted.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

/// The data needed to create or update a currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyData {
    /// The ISO code, e.g. "USD".
    pub id: String,
    /// How much of this currency one unit of the base currency buys.
    pub rate: Decimal,
    /// The number of digits shown after the decimal point.
    pub decimal_places: u32,
    /// Inactive currencies cannot be used by new transactions.
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

fn default_is_active() -> bool {
    true
}

/// Trim and upper-case a currency code, rejecting anything that is not 3 to 8 letters or digits.
///
/// # Errors
/// Returns [Error::InvalidArgument] for malformed codes.
pub fn normalize_currency_code(code: &str) -> Result<String, Error> {
    let code = code.trim().to_uppercase();

    if (3..=8).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric()) {
        Ok(code)
    } else {
        Err(Error::InvalidArgument(format!(
            "\"{code}\" is not a valid currency code"
        )))
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Initialize the currency table.
pub fn create_currency_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS currency (
            id TEXT PRIMARY KEY,
            rate TEXT NOT NULL,
            decimal_places INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )",
        (),
    )?;

    Ok(())
}

/// Make sure the base currency exists, is live and has a rate of one.
pub fn seed_base_currency(
    base_currency: &str,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let code = normalize_currency_code(base_currency)?;

    connection.execute(
        "INSERT INTO currency (id, rate, decimal_places, is_active, updated_at)
         VALUES (?1, '1', 2, 1, ?2)
         ON CONFLICT(id) DO UPDATE SET rate = '1', is_active = 1, deleted_at = NULL",
        (&code, now),
    )?;

    Ok(())
}

fn validate_currency_data(data: CurrencyData, base_currency: &str) -> Result<CurrencyData, Error> {
    let id = normalize_currency_code(&data.id)?;

    if data.decimal_places > MAX_DECIMAL_PLACES {
        return Err(Error::InvalidArgument(format!(
            "a currency may have at most {MAX_DECIMAL_PLACES} decimal places"
        )));
    }

    if id == base_currency {
        if !data.is_active {
            return Err(Error::InvalidArgument(
                "the base currency cannot be deactivated".to_owned(),
            ));
        }

        return Ok(CurrencyData {
            id,
            rate: Decimal::ONE,
            ..data
        });
    }

    if data.rate <= Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "the rate for {id} must be greater than zero"
        )));
    }

    Ok(CurrencyData { id, ..data })
}

/// Create a currency.
///
/// A previously deleted currency with the same code is brought back with the new values.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if the code, rate or decimal places are invalid,
/// - [Error::DuplicateCurrency] if a live currency with the same code exists,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_currency(
    data: CurrencyData,
    base_currency: &str,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Currency, Error> {
    let data = validate_currency_data(data, base_currency)?;

    let existing = connection
        .prepare("SELECT deleted_at FROM currency WHERE id = ?1")?
        .query_row([&data.id], |row| row.get::<_, Option<OffsetDateTime>>(0));

    match existing {
        Ok(None) => return Err(Error::DuplicateCurrency(data.id)),
        Ok(Some(_)) => {
            connection.execute(
                "UPDATE currency
                 SET rate = ?1, decimal_places = ?2, is_active = ?3, updated_at = ?4, deleted_at = NULL
                 WHERE id = ?5",
                (
                    data.rate.to_string(),
                    data.decimal_places,
                    data.is_active,
                    now,
                    &data.id,
                ),
            )?;
        }
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            connection.execute(
                "INSERT INTO currency (id, rate, decimal_places, is_active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    &data.id,
                    data.rate.to_string(),
                    data.decimal_places,
                    data.is_active,
                    now,
                ),
            )?;
        }
        Err(error) => return Err(error.into()),
    }

    get_currency(&data.id, connection)
}

/// Update the rate, decimal places and active flag of a live currency.
///
/// Updating the base currency always leaves its rate at one.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if the new values are invalid,
/// - [Error::NotFound] if there is no live currency with the code,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn update_currency(
    data: CurrencyData,
    base_currency: &str,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<Currency, Error> {
    let data = validate_currency_data(data, base_currency)?;

    let rows_affected = connection.execute(
        "UPDATE currency SET rate = ?1, decimal_places = ?2, is_active = ?3, updated_at = ?4
         WHERE id = ?5 AND deleted_at IS NULL",
        (
            data.rate.to_string(),
            data.decimal_places,
            data.is_active,
            now,
            &data.id,
        ),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    get_currency(&data.id, connection)
}

/// Soft delete a currency.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if `id` is the base currency,
/// - [Error::Conflict] if a live account or transaction is denominated in the currency,
/// - [Error::NotFound] if there is no live currency with the code,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn delete_currency(
    id: &str,
    base_currency: &str,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let id = normalize_currency_code(id)?;

    if id == base_currency {
        return Err(Error::InvalidArgument(
            "the base currency cannot be deleted".to_owned(),
        ));
    }

    let in_use: bool = connection.query_row(
        "SELECT EXISTS(SELECT 1 FROM account WHERE currency = ?1 AND deleted_at IS NULL)
             OR EXISTS(SELECT 1 FROM \"transaction\"
                 WHERE (source_currency = ?1 OR destination_currency = ?1) AND deleted_at IS NULL)",
        [&id],
        |row| row.get(0),
    )?;

    if in_use {
        return Err(Error::Conflict(format!(
            "the currency {id} is still used by accounts or transactions"
        )));
    }

    let rows_affected = connection.execute(
        "UPDATE currency SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        (now, &id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Retrieve a live currency by its code.
///
/// # Errors
/// Returns [Error::NotFound] if the currency does not exist or was deleted.
pub fn get_currency(id: &str, connection: &Connection) -> Result<Currency, Error> {
    connection
        .prepare(
            "SELECT id, rate, decimal_places, is_active, updated_at, deleted_at
             FROM currency WHERE id = ?1 AND deleted_at IS NULL",
        )?
        .query_row([id.trim().to_uppercase()], map_currency_row)
        .map_err(|error| error.into())
}

/// List live currencies, active ones first and then by descending code.
///
/// An empty `ids` returns every currency. Inactive currencies are skipped unless
/// `include_disabled` is set.
pub fn get_currencies(
    ids: &[String],
    include_disabled: bool,
    connection: &Connection,
) -> Result<Vec<Currency>, Error> {
    let mut query = "SELECT id, rate, decimal_places, is_active, updated_at, deleted_at
         FROM currency WHERE deleted_at IS NULL"
        .to_owned();

    if !include_disabled {
        query.push_str(" AND is_active = 1");
    }

    if !ids.is_empty() {
        query.push_str(&format!(" AND id IN ({})", placeholders(ids.len())));
    }

    query.push_str(" ORDER BY is_active DESC, id DESC");

    let ids = ids.iter().map(|id| id.trim().to_uppercase());

    connection
        .prepare(&query)?
        .query_map(params_from_iter(ids), map_currency_row)?
        .map(|maybe_currency| maybe_currency.map_err(|error| error.into()))
        .collect()
}

/// The rate of a live currency.
///
/// # Errors
/// Returns [Error::RateNotFound] if the currency does not exist or was deleted.
pub fn get_rate(id: &str, connection: &Connection) -> Result<Decimal, Error> {
    connection
        .prepare("SELECT rate FROM currency WHERE id = ?1 AND deleted_at IS NULL")?
        .query_row([id], |row| get_decimal(row, 0))
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::RateNotFound(id.to_owned()),
            error => error.into(),
        })
}

/// Convert `amount` between two rates, `amount * to_rate / from_rate`.
///
/// # Errors
/// Returns [Error::InvalidArgument] if `from_rate` is zero or the result overflows.
pub fn convert_with_rates(
    amount: Decimal,
    from_rate: Decimal,
    to_rate: Decimal,
) -> Result<Decimal, Error> {
    if from_rate == to_rate {
        return Ok(amount);
    }

    amount
        .checked_mul(to_rate)
        .and_then(|scaled| scaled.checked_div(from_rate))
        .ok_or_else(|| {
            Error::InvalidArgument(format!(
                "could not convert {amount} with rates {from_rate} and {to_rate}"
            ))
        })
}

/// Convert `amount` from the currency `from` into the currency `to` using the stored rates.
///
/// # Errors
/// Returns [Error::RateNotFound] if either currency does not exist or was deleted.
pub fn convert(
    from: &str,
    to: &str,
    amount: Decimal,
    connection: &Connection,
) -> Result<Decimal, Error> {
    let from_rate = get_rate(from, connection)?;
    let to_rate = get_rate(to, connection)?;

    convert_with_rates(amount, from_rate, to_rate)
}

/// Format `amount` with the decimal places of `currency_id`, e.g. "12.50".
///
/// # Errors
/// Returns [Error::NotFound] if the currency does not exist or was deleted.
pub fn format_amount(
    amount: Decimal,
    currency_id: &str,
    connection: &Connection,
) -> Result<String, Error> {
    let currency = get_currency(currency_id, connection)?;

    Ok(format_decimal(amount, currency.decimal_places))
}

fn map_currency_row(row: &Row) -> Result<Currency, rusqlite::Error> {
    Ok(Currency {
        id: row.get(0)?,
        rate: get_decimal(row, 1)?,
        decimal_places: row.get(2)?,
        is_active: row.get(3)?,
        updated_at: row.get(4)?,
        deleted_at: row.get(5)?,
    })
}

#[cfg(test)]
mod currency_store_tests {
    use rust_decimal::Decimal;
    use time::macros::datetime;

    use crate::{
        Error,
        account::{AccountType, NewAccount, create_account},
        test_utils::{dec, get_test_connection},
    };

    use super::{
        CurrencyData, create_currency, delete_currency, format_amount, get_currencies,
        get_currency, update_currency,
    };

    fn eur(rate: &str) -> CurrencyData {
        CurrencyData {
            id: "eur".to_owned(),
            rate: dec(rate),
            decimal_places: 2,
            is_active: true,
        }
    }

    #[test]
    fn create_currency_normalizes_code() {
        let connection = get_test_connection();

        let currency = create_currency(eur("0.8"), "USD", datetime!(2025-01-01 0:00 UTC), &connection)
            .expect("could not create currency");

        assert_eq!(currency.id, "EUR");
        assert_eq!(currency.rate, dec("0.8"));
    }

    #[test]
    fn create_currency_rejects_duplicates() {
        let connection = get_test_connection();
        let now = datetime!(2025-01-01 0:00 UTC);
        create_currency(eur("0.8"), "USD", now, &connection).unwrap();

        let result = create_currency(eur("0.9"), "USD", now, &connection);

        assert_eq!(result, Err(Error::DuplicateCurrency("EUR".to_owned())));
    }

    #[test]
    fn create_currency_revives_deleted_code() {
        let connection = get_test_connection();
        let now = datetime!(2025-01-01 0:00 UTC);
        create_currency(eur("0.8"), "USD", now, &connection).unwrap();
        delete_currency("EUR", "USD", now, &connection).unwrap();

        let currency = create_currency(eur("0.9"), "USD", now, &connection).unwrap();

        assert_eq!(currency.rate, dec("0.9"));
        assert_eq!(currency.deleted_at, None);
    }

    #[test]
    fn create_currency_rejects_non_positive_rate() {
        let connection = get_test_connection();

        let result = create_currency(eur("0"), "USD", datetime!(2025-01-01 0:00 UTC), &connection);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn updating_base_currency_forces_rate_of_one() {
        let connection = get_test_connection();
        let data = CurrencyData {
            id: "USD".to_owned(),
            rate: dec("3.5"),
            decimal_places: 2,
            is_active: true,
        };

        let currency = update_currency(data, "USD", datetime!(2025-01-01 0:00 UTC), &connection)
            .unwrap();

        assert_eq!(currency.rate, Decimal::ONE);
    }

    #[test]
    fn deleting_base_currency_is_rejected() {
        let connection = get_test_connection();

        let result = delete_currency("USD", "USD", datetime!(2025-01-01 0:00 UTC), &connection);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn deleted_currency_is_not_found() {
        let connection = get_test_connection();
        let now = datetime!(2025-01-01 0:00 UTC);
        create_currency(eur("0.8"), "USD", now, &connection).unwrap();

        delete_currency("EUR", "USD", now, &connection).unwrap();

        assert_eq!(get_currency("EUR", &connection), Err(Error::NotFound));
        assert_eq!(
            delete_currency("EUR", "USD", now, &connection),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn currency_used_by_account_cannot_be_deleted() {
        let connection = get_test_connection();
        let now = datetime!(2025-01-01 0:00 UTC);
        create_currency(eur("0.8"), "USD", now, &connection).unwrap();
        create_account(NewAccount::new("Giro", AccountType::Asset, "EUR"), now, &connection)
            .unwrap();

        let result = delete_currency("eur", "USD", now, &connection);

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(get_currency("EUR", &connection).unwrap().deleted_at, None);
    }

    #[test]
    fn listing_orders_active_first_then_code_descending() {
        let connection = get_test_connection();
        let now = datetime!(2025-01-01 0:00 UTC);
        create_currency(eur("0.8"), "USD", now, &connection).unwrap();
        create_currency(
            CurrencyData {
                id: "GBP".to_owned(),
                rate: dec("0.7"),
                decimal_places: 2,
                is_active: false,
            },
            "USD",
            now,
            &connection,
        )
        .unwrap();
        create_currency(
            CurrencyData {
                id: "JPY".to_owned(),
                rate: dec("150"),
                decimal_places: 0,
                is_active: true,
            },
            "USD",
            now,
            &connection,
        )
        .unwrap();

        let active: Vec<String> = get_currencies(&[], false, &connection)
            .unwrap()
            .into_iter()
            .map(|currency| currency.id)
            .collect();
        let all: Vec<String> = get_currencies(&[], true, &connection)
            .unwrap()
            .into_iter()
            .map(|currency| currency.id)
            .collect();
        let filtered: Vec<String> = get_currencies(&["eur".to_owned()], true, &connection)
            .unwrap()
            .into_iter()
            .map(|currency| currency.id)
            .collect();

        assert_eq!(active, ["USD", "JPY", "EUR"]);
        assert_eq!(all, ["USD", "JPY", "EUR", "GBP"]);
        assert_eq!(filtered, ["EUR"]);
    }

    #[test]
    fn format_amount_uses_decimal_places() {
        let connection = get_test_connection();
        let now = datetime!(2025-01-01 0:00 UTC);
        create_currency(
            CurrencyData {
                id: "BHD".to_owned(),
                rate: dec("0.376"),
                decimal_places: 3,
                is_active: true,
            },
            "USD",
            now,
            &connection,
        )
        .unwrap();

        assert_eq!(format_amount(dec("12.5"), "USD", &connection), Ok("12.50".to_owned()));
        assert_eq!(format_amount(dec("1.2"), "BHD", &connection), Ok("1.200".to_owned()));
    }
}
