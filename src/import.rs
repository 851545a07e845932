//! Importing bank statements exported as CSV.
//!
//! A statement needs a header row with `date`, `description` and `amount` columns, in any order
//! and any case. A `currency` column is optional. Negative amounts are withdrawals from the import
//! account and positive amounts are deposits into it.

use std::str::FromStr;

use axum::{Extension, Json, extract::State};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Date, format_description::BorrowedFormatItem, macros::format_description};

use crate::{
    AppState, Error, ErrorContext,
    account::AccountId,
    auth::AuthContext,
    clock::now_utc,
    db::with_write_transaction,
    transaction::{
        CreateTransactionRequest, PostingContext, TransactionType, import_id_exists,
        post_transaction,
    },
};

const DATE_FORMATS: [&[BorrowedFormatItem]; 3] = [
    format_description!("[year]-[month]-[day]"),
    format_description!("[day]/[month]/[year]"),
    format_description!("[day] [month repr:short] [year]"),
];

/// How to turn statement rows into transactions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImportOptions {
    /// The account the statement belongs to.
    pub account_id: AccountId,
    /// The currency of rows without a `currency` column, the account's currency if missing.
    #[serde(default)]
    pub currency: Option<String>,
    /// Whether the imported transactions bypass the rule engine.
    #[serde(default)]
    pub skip_rules: bool,
}

/// What an import did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    /// Rows that became transactions.
    pub imported: usize,
    /// Rows that had already been imported.
    pub skipped: usize,
}

struct Columns {
    date: usize,
    description: usize,
    amount: usize,
    currency: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, Error> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| Error::InvalidCSV(format!("missing the \"{name}\" column")))
        };

        Ok(Self {
            date: require("date")?,
            description: require("description")?,
            amount: require("amount")?,
            currency: find("currency"),
        })
    }
}

/// Parse a CSV statement into draft transactions without writing anything.
///
/// Every draft carries an `import_id` derived from the raw row, so importing the same row twice
/// can be detected.
///
/// # Errors
/// Returns [Error::InvalidCSV] naming the line of the first malformed row.
pub fn parse_statement(
    text: &str,
    options: &ImportOptions,
) -> Result<Vec<CreateTransactionRequest>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|error| Error::InvalidCSV(error.to_string()))?
        .clone();
    let columns = Columns::from_headers(&headers)?;

    let mut drafts = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|error| Error::InvalidCSV(error.to_string()))?;
        let line = record.position().map(|position| position.line()).unwrap_or(0);
        let field = |index: usize| record.get(index).unwrap_or_default();

        let date = parse_date(field(columns.date)).ok_or_else(|| {
            Error::InvalidCSV(format!(
                "could not parse \"{}\" as a date on line {line}",
                field(columns.date)
            ))
        })?;

        let raw_amount = field(columns.amount).replace(',', "");
        let amount = Decimal::from_str(&raw_amount).map_err(|error| {
            Error::InvalidCSV(format!(
                "could not parse \"{}\" as an amount on line {line}: {error}",
                field(columns.amount)
            ))
        })?;

        if amount.is_zero() {
            return Err(Error::InvalidCSV(format!("zero amount on line {line}")));
        }

        let currency = columns
            .currency
            .map(field)
            .filter(|currency| !currency.is_empty())
            .map(str::to_owned)
            .or_else(|| options.currency.clone());

        let transaction_date = date.midnight().assume_utc();
        let mut draft = if amount.is_sign_negative() {
            let mut draft =
                CreateTransactionRequest::new(TransactionType::Withdrawal, transaction_date)
                    .source(options.account_id);
            draft.source_amount = Some(amount.abs());
            draft.source_currency = currency;
            draft
        } else {
            let mut draft =
                CreateTransactionRequest::new(TransactionType::Deposit, transaction_date)
                    .destination(options.account_id);
            draft.destination_amount = Some(amount);
            draft.destination_currency = currency;
            draft
        };

        draft.title = field(columns.description).to_owned();
        draft.import_id = Some(create_import_id(options.account_id, &record));
        draft.skip_rules = options.skip_rules;

        drafts.push(draft);
    }

    Ok(drafts)
}

fn parse_date(text: &str) -> Option<Date> {
    DATE_FORMATS
        .iter()
        .find_map(|format| Date::parse(text, format).ok())
}

/// A hash of the account and the raw fields of a statement row.
pub fn create_import_id(account_id: AccountId, record: &csv::StringRecord) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(account_id.to_le_bytes());

    for field in record.iter() {
        hasher.update([0x1f_u8]);
        hasher.update(field.as_bytes());
    }

    let digest = hasher.finalize();
    let mut prefix = [0; 8];
    prefix.copy_from_slice(&digest[..8]);

    i64::from_le_bytes(prefix)
}

/// Parse a statement and create its transactions in one database transaction.
///
/// Rows that were imported before, including repeats within `text`, are skipped.
///
/// # Errors
/// Returns parse errors from [parse_statement] and the first error of any row, in which case
/// nothing is imported.
pub fn import_statement(
    text: &str,
    options: &ImportOptions,
    context: PostingContext,
    connection: &mut Connection,
) -> Result<ImportSummary, Error> {
    let drafts = parse_statement(text, options)?;

    let summary = with_write_transaction(connection, |transaction| {
        let mut summary = ImportSummary::default();

        for draft in &drafts {
            if let Some(import_id) = draft.import_id {
                if import_id_exists(import_id, transaction)? {
                    summary.skipped += 1;
                    continue;
                }
            }

            post_transaction(draft, context, transaction)?;
            summary.imported += 1;
        }

        Ok(summary)
    })
    .context("failed to import statement")?;

    tracing::info!(
        "Imported {} rows into account {}, skipped {} already imported",
        summary.imported,
        options.account_id,
        summary.skipped
    );

    Ok(summary)
}

// ============================================================================
// ENDPOINTS
// ============================================================================

/// The request body for parsing or importing a statement.
#[derive(Debug, Deserialize)]
pub struct ImportStatementRequest {
    /// The CSV text.
    pub csv: String,
    /// How to read it.
    #[serde(flatten)]
    pub options: ImportOptions,
}

/// Show the transactions a statement would create.
pub async fn parse_statement_endpoint(
    Json(request): Json<ImportStatementRequest>,
) -> Result<Json<Vec<CreateTransactionRequest>>, Error> {
    parse_statement(&request.csv, &request.options).map(Json)
}

/// Import a statement.
pub async fn import_statement_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ImportStatementRequest>,
) -> Result<Json<ImportSummary>, Error> {
    auth.require_user()?;
    let mut connection = state.db.write()?;
    let context = PostingContext::new(&state.config, &state.rules, now_utc());

    import_statement(&request.csv, &request.options, context, &mut connection).map(Json)
}

#[cfg(test)]
mod import_tests {
    use time::macros::datetime;

    use crate::{
        Config, Error, RuleEngine,
        account::{DefaultAccount, get_default_account},
        test_utils::{dec, get_test_connection},
        transaction::{PostingContext, TransactionType, count_transactions},
    };

    use super::{ImportOptions, ImportSummary, import_statement, parse_statement};

    const NOW: time::OffsetDateTime = datetime!(2025-05-10 12:00 UTC);

    const STATEMENT: &str = "\
Date,Description,Amount
2025-05-01,Salary,2500.00
2025-05-02,Countdown Ponsonby,-84.20
03/05/2025,\"Coffee, flat white\",-5.50
";

    fn options(account_id: i64) -> ImportOptions {
        ImportOptions {
            account_id,
            currency: None,
            skip_rules: false,
        }
    }

    #[test]
    fn rows_become_deposits_and_withdrawals() {
        let drafts = parse_statement(STATEMENT, &options(4)).unwrap();

        assert_eq!(drafts.len(), 3);

        assert_eq!(drafts[0].transaction_type, TransactionType::Deposit);
        assert_eq!(drafts[0].destination_account_id, Some(4));
        assert_eq!(drafts[0].destination_amount, Some(dec("2500.00")));
        assert_eq!(drafts[0].title, "Salary");

        assert_eq!(drafts[1].transaction_type, TransactionType::Withdrawal);
        assert_eq!(drafts[1].source_account_id, Some(4));
        assert_eq!(drafts[1].source_amount, Some(dec("84.20")));

        assert_eq!(drafts[2].title, "Coffee, flat white");
        assert_eq!(
            drafts[2].transaction_date,
            datetime!(2025-05-03 00:00 UTC)
        );
    }

    #[test]
    fn import_ids_depend_on_row_and_account() {
        let first = parse_statement(STATEMENT, &options(4)).unwrap();
        let again = parse_statement(STATEMENT, &options(4)).unwrap();
        let other_account = parse_statement(STATEMENT, &options(5)).unwrap();

        assert_eq!(first[0].import_id, again[0].import_id);
        assert_ne!(first[0].import_id, first[1].import_id);
        assert_ne!(first[0].import_id, other_account[0].import_id);
    }

    #[test]
    fn missing_column_is_rejected() {
        let result = parse_statement("Date,Amount\n2025-05-01,10\n", &options(4));

        assert_eq!(
            result,
            Err(Error::InvalidCSV(
                "missing the \"description\" column".to_owned()
            ))
        );
    }

    #[test]
    fn bad_amount_names_the_line() {
        let result = parse_statement(
            "date,description,amount\n2025-05-01,Lunch,12.00\n2025-05-02,Dinner,lots\n",
            &options(4),
        );

        match result {
            Err(Error::InvalidCSV(message)) => assert!(message.contains("line 3"), "{message}"),
            other => panic!("expected InvalidCSV, got {other:?}"),
        }
    }

    #[test]
    fn importing_twice_skips_known_rows() {
        let mut connection = get_test_connection();
        let cash = get_default_account(DefaultAccount::Cash, &connection)
            .unwrap()
            .id;
        let config = Config::default();
        let engine = RuleEngine::new();
        let context = PostingContext::new(&config, &engine, NOW);

        let first = import_statement(STATEMENT, &options(cash), context, &mut connection).unwrap();
        let second = import_statement(STATEMENT, &options(cash), context, &mut connection).unwrap();

        assert_eq!(
            first,
            ImportSummary {
                imported: 3,
                skipped: 0
            }
        );
        assert_eq!(
            second,
            ImportSummary {
                imported: 0,
                skipped: 3
            }
        );
        assert_eq!(count_transactions(&connection), Ok(3));
    }

    #[test]
    fn failing_row_imports_nothing() {
        let mut connection = get_test_connection();
        let config = Config::default();
        let engine = RuleEngine::new();

        let result = import_statement(
            STATEMENT,
            &options(999),
            PostingContext::new(&config, &engine, NOW),
            &mut connection,
        );

        assert!(result.is_err());
        assert_eq!(count_transactions(&connection), Ok(0));
    }
}
