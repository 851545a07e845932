//! Listing and searching transactions.

use rusqlite::{Connection, ToSql, params_from_iter};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Error,
    account::AccountId,
    category::CategoryId,
    clock::normalize,
    database_id::TransactionId,
    db::placeholders,
    tag::TagId,
    transaction::{TRANSACTION_COLUMNS, Transaction, TransactionType, map_transaction_row},
    transaction_tag::get_transaction_tag_ids,
};

/// The number of transactions returned when no page size is given.
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// The largest page size a caller may ask for.
pub const MAX_PAGE_SIZE: u32 = 500;
/// The most title suggestions returned at once.
pub const MAX_TITLE_SUGGESTIONS: u32 = 10;

/// Which transactions to list. Empty sets and missing bounds do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Transactions where either side is one of these accounts.
    #[serde(default)]
    pub account_ids: Vec<AccountId>,
    /// Transactions in one of these categories.
    #[serde(default)]
    pub category_ids: Vec<CategoryId>,
    /// Transactions with at least one of these tags.
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// Transactions of one of these types.
    #[serde(default)]
    pub transaction_types: Vec<TransactionType>,
    /// Transactions dated at or after this instant.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub from_date: Option<OffsetDateTime>,
    /// Transactions dated at or before this instant.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub to_date: Option<OffsetDateTime>,
    /// Text that must appear in the title or notes, ignoring ASCII case.
    #[serde(default)]
    pub search: Option<String>,
    /// The `next_cursor` of the previous page.
    #[serde(default)]
    pub cursor: Option<String>,
    /// How many transactions to return, see [DEFAULT_PAGE_SIZE] and [MAX_PAGE_SIZE].
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// One page of transactions, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionPage {
    /// The transactions on this page.
    pub transactions: Vec<Transaction>,
    /// Pass this back in [TransactionFilter::cursor] to get the next page, absent on the last
    /// page.
    pub next_cursor: Option<String>,
}

/// A position in the `(transaction_date desc, id desc)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    transaction_date: OffsetDateTime,
    id: TransactionId,
}

impl Cursor {
    fn encode(&self) -> String {
        format!("{}:{}", self.transaction_date.unix_timestamp(), self.id)
    }

    fn decode(text: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidArgument(format!("invalid cursor \"{text}\""));

        let (timestamp, id) = text.split_once(':').ok_or_else(invalid)?;
        let timestamp: i64 = timestamp.parse().map_err(|_| invalid())?;
        let id: TransactionId = id.parse().map_err(|_| invalid())?;
        let transaction_date =
            OffsetDateTime::from_unix_timestamp(timestamp).map_err(|_| invalid())?;

        Ok(Self {
            transaction_date,
            id,
        })
    }
}

/// Escape the LIKE wildcards in `text` using `\` as the escape character.
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// List live transactions matching `filter`, newest first.
///
/// # Errors
/// Returns [Error::InvalidArgument] if the cursor is malformed, the page size is out of range or
/// the date range is inverted.
pub fn list_transactions(
    filter: &TransactionFilter,
    connection: &Connection,
) -> Result<TransactionPage, Error> {
    let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(Error::InvalidArgument(format!(
            "page size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        )));
    }

    if let (Some(from), Some(to)) = (filter.from_date, filter.to_date) {
        if from > to {
            return Err(Error::InvalidArgument(
                "the start of the date range is after its end".to_owned(),
            ));
        }
    }

    let mut clauses = vec!["t.deleted_at IS NULL".to_owned()];
    let mut parameters: Vec<Box<dyn ToSql>> = Vec::new();

    if !filter.account_ids.is_empty() {
        let list = placeholders(filter.account_ids.len());
        clauses.push(format!(
            "(t.source_account_id IN ({list}) OR t.destination_account_id IN ({list}))"
        ));
        for _ in 0..2 {
            for id in &filter.account_ids {
                parameters.push(Box::new(*id));
            }
        }
    }

    if !filter.category_ids.is_empty() {
        clauses.push(format!(
            "t.category_id IN ({})",
            placeholders(filter.category_ids.len())
        ));
        for id in &filter.category_ids {
            parameters.push(Box::new(*id));
        }
    }

    if !filter.tag_ids.is_empty() {
        clauses.push(format!(
            "EXISTS (SELECT 1 FROM transaction_tag tt
                     WHERE tt.transaction_id = t.id AND tt.tag_id IN ({}))",
            placeholders(filter.tag_ids.len())
        ));
        for id in &filter.tag_ids {
            parameters.push(Box::new(*id));
        }
    }

    if !filter.transaction_types.is_empty() {
        clauses.push(format!(
            "t.type IN ({})",
            placeholders(filter.transaction_types.len())
        ));
        for transaction_type in &filter.transaction_types {
            parameters.push(Box::new(*transaction_type));
        }
    }

    if let Some(from) = filter.from_date {
        clauses.push("t.transaction_date >= ?".to_owned());
        parameters.push(Box::new(normalize(from)));
    }

    if let Some(to) = filter.to_date {
        clauses.push("t.transaction_date <= ?".to_owned());
        parameters.push(Box::new(normalize(to)));
    }

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        clauses.push("(t.title LIKE ? ESCAPE '\\' OR t.notes LIKE ? ESCAPE '\\')".to_owned());
        let pattern = format!("%{}%", escape_like(search));
        parameters.push(Box::new(pattern.clone()));
        parameters.push(Box::new(pattern));
    }

    if let Some(cursor) = filter.cursor.as_deref() {
        let cursor = Cursor::decode(cursor)?;
        clauses.push(
            "(t.transaction_date < ? OR (t.transaction_date = ? AND t.id < ?))".to_owned(),
        );
        parameters.push(Box::new(cursor.transaction_date));
        parameters.push(Box::new(cursor.transaction_date));
        parameters.push(Box::new(cursor.id));
    }

    // One extra row tells us whether there is another page.
    parameters.push(Box::new(page_size + 1));

    let query = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" t
         WHERE {}
         ORDER BY t.transaction_date DESC, t.id DESC
         LIMIT ?",
        clauses.join(" AND ")
    );

    let mut transactions = connection
        .prepare(&query)?
        .query_map(params_from_iter(parameters.iter()), map_transaction_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let next_cursor = if transactions.len() > page_size as usize {
        transactions.truncate(page_size as usize);
        transactions.last().map(|last| {
            Cursor {
                transaction_date: last.transaction_date,
                id: last.id,
            }
            .encode()
        })
    } else {
        None
    };

    for transaction in &mut transactions {
        transaction.tag_ids = get_transaction_tag_ids(transaction.id, connection)?;
    }

    Ok(TransactionPage {
        transactions,
        next_cursor,
    })
}

/// Distinct titles starting with `prefix`, ignoring ASCII case, most recently used first.
pub fn get_title_suggestions(prefix: &str, connection: &Connection) -> Result<Vec<String>, Error> {
    let pattern = format!("{}%", escape_like(prefix.trim()));

    connection
        .prepare(
            "SELECT title FROM \"transaction\"
             WHERE deleted_at IS NULL AND title <> '' AND title LIKE ?1 ESCAPE '\\'
             GROUP BY title
             ORDER BY MAX(transaction_date) DESC, title ASC
             LIMIT ?2",
        )?
        .query_map((pattern, MAX_TITLE_SUGGESTIONS), |row| row.get(0))?
        .map(|maybe_title| maybe_title.map_err(|error| error.into()))
        .collect()
}
