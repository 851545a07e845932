//! The many-to-many relationship between transactions and tags.

use rusqlite::Connection;

use crate::{Error, database_id::TransactionId, tag::TagId};

/// Create the transaction_tag junction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_tag_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS transaction_tag (
            transaction_id INTEGER NOT NULL REFERENCES \"transaction\"(id) ON DELETE CASCADE,
            tag_id INTEGER NOT NULL REFERENCES tag(id),
            PRIMARY KEY (transaction_id, tag_id)
        );

        CREATE INDEX IF NOT EXISTS idx_transaction_tag_tag_id ON transaction_tag(tag_id);",
    )?;

    Ok(())
}

/// Replace the tags of a transaction with `tag_ids`.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn set_transaction_tags(
    transaction_id: TransactionId,
    tag_ids: &[TagId],
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "DELETE FROM transaction_tag WHERE transaction_id = ?1",
        [transaction_id],
    )?;

    let mut statement = connection.prepare(
        "INSERT OR IGNORE INTO transaction_tag (transaction_id, tag_id) VALUES (?1, ?2)",
    )?;
    for tag_id in tag_ids {
        statement.execute((transaction_id, tag_id))?;
    }

    Ok(())
}

/// The IDs of the tags on a transaction in ascending order.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn get_transaction_tag_ids(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Vec<TagId>, Error> {
    connection
        .prepare("SELECT tag_id FROM transaction_tag WHERE transaction_id = ?1 ORDER BY tag_id")?
        .query_map([transaction_id], |row| row.get(0))?
        .map(|maybe_id| maybe_id.map_err(|error| error.into()))
        .collect()
}
