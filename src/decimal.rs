//! Fixed point decimal helpers for monetary values.
//!
//! Amounts are [Decimal]s everywhere in the ledger and are stored as TEXT so that SQLite never
//! sees a float.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use rusqlite::{Row, types::Type};

use crate::Error;

/// Parse a decimal number such as "12.50" or "-3".
///
/// # Errors
///
/// Returns [Error::InvalidDecimal] if `text` is not a decimal number.
pub fn parse_decimal(text: &str) -> Result<Decimal, Error> {
    let trimmed = text.trim();

    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| Error::InvalidDecimal(text.to_owned()))
}

/// Round `amount` to `decimal_places`, rounding halves away from zero.
pub fn round_to(amount: Decimal, decimal_places: u32) -> Decimal {
    amount.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointAwayFromZero)
}

/// Format `amount` with exactly `decimal_places` digits after the point.
///
/// Trailing zeros are kept, e.g. 12.5 with two decimal places is "12.50".
pub fn format_decimal(amount: Decimal, decimal_places: u32) -> String {
    let mut rounded = round_to(amount, decimal_places);
    rounded.rescale(decimal_places);

    rounded.to_string()
}

/// Read a decimal stored as TEXT from column `index` of `row`.
pub fn get_decimal(row: &Row, index: usize) -> Result<Decimal, rusqlite::Error> {
    let text: String = row.get(index)?;

    Decimal::from_str(&text).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
    })
}

/// Read a nullable decimal stored as TEXT from column `index` of `row`.
pub fn get_optional_decimal(row: &Row, index: usize) -> Result<Option<Decimal>, rusqlite::Error> {
    let text: Option<String> = row.get(index)?;

    text.map(|text| {
        Decimal::from_str(&text).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
        })
    })
    .transpose()
}
