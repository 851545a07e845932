#![allow(missing_docs)]

use std::str::FromStr;

use rusqlite::Connection;
use rust_decimal::Decimal;

use crate::db::initialize;

/// The PKCS#1 private key used to sign tokens in tests.
pub(crate) const TEST_PRIVATE_KEY: &str = include_str!("keys/private.pem");
/// The public half of [TEST_PRIVATE_KEY].
pub(crate) const TEST_PUBLIC_KEY: &str = include_str!("keys/public.pem");
/// A private key that does not match [TEST_PUBLIC_KEY].
pub(crate) const OTHER_PRIVATE_KEY: &str = include_str!("keys/other_private.pem");

/// An initialized in-memory database with USD as the base currency.
pub(crate) fn get_test_connection() -> Connection {
    let connection = Connection::open_in_memory().expect("could not open in-memory database");
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .expect("could not enable foreign keys");
    initialize(&connection, "USD").expect("could not initialize test database");

    connection
}

/// Parse a decimal literal, panicking on malformed input.
pub(crate) fn dec(text: &str) -> Decimal {
    Decimal::from_str(text).unwrap_or_else(|_| panic!("invalid decimal literal {text}"))
}
