//! Creating, updating and deleting transactions together with their ledger rows.

use rusqlite::Connection;
use time::{Duration, OffsetDateTime};

use crate::{
    Config, Error, ErrorContext,
    account::AccountId,
    clock::normalize,
    database_id::TransactionId,
    db::{placeholders, with_write_transaction},
    maintenance::refresh_daily_balances,
    rule::{DEFAULT_RULE_GROUP, RuleEngine, TransactionView, list_pipeline_rules},
    transaction::{
        CreateTransactionRequest, Transaction, UpdateTransactionRequest, delete_double_entries,
        get_transaction, insert_double_entries, tombstone_double_entries,
        validate::{PostingDraft, ensure_references, resolve_request},
    },
    transaction_tag::set_transaction_tags,
};

/// Everything a write needs besides the database.
#[derive(Debug, Clone, Copy)]
pub struct PostingContext<'a> {
    /// The frozen application configuration.
    pub config: &'a Config,
    /// The engine that runs the default rule group.
    pub rules: &'a RuleEngine,
    /// The time of the write, also used as the rules' clock.
    pub now: OffsetDateTime,
}

impl<'a> PostingContext<'a> {
    /// A context for a write happening at `now`.
    pub fn new(config: &'a Config, rules: &'a RuleEngine, now: OffsetDateTime) -> Self {
        Self {
            config,
            rules,
            now: normalize(now),
        }
    }
}

/// Create a transaction and its ledger rows in one database transaction.
///
/// # Errors
/// Validation and rule errors are returned as is. Database errors are wrapped with the context
/// "failed to create transaction".
pub fn create_transaction(
    request: CreateTransactionRequest,
    context: PostingContext,
    connection: &mut Connection,
) -> Result<Transaction, Error> {
    with_write_transaction(connection, |transaction| {
        post_transaction(&request, context, transaction)
    })
    .context("failed to create transaction")
}

/// Create several transactions, either all of them or none.
///
/// # Errors
/// Returns the first error raised by any of the requests, in which case nothing is written.
pub fn create_transactions_bulk(
    requests: Vec<CreateTransactionRequest>,
    context: PostingContext,
    connection: &mut Connection,
) -> Result<Vec<Transaction>, Error> {
    with_write_transaction(connection, |transaction| {
        requests
            .iter()
            .map(|request| post_transaction(request, context, transaction))
            .collect()
    })
    .context("failed to create transactions")
}

/// Validate, run the rules and write one transaction using `connection`.
///
/// `connection` should be a transaction or savepoint, the caller commits.
pub fn post_transaction(
    request: &CreateTransactionRequest,
    context: PostingContext,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let mut draft = resolve_request(request, context.config, context.now, connection)?;

    if !request.skip_rules {
        apply_rules(&mut draft, context, connection)?;
    }

    ensure_references(&draft, connection)?;

    let transaction_id = insert_transaction_row(&draft, context.now, connection)?;
    set_transaction_tags(transaction_id, &draft.tag_ids, connection)?;

    let transaction = get_transaction(transaction_id, connection)?;
    insert_double_entries(&transaction, &context.config.base_currency, connection)?;

    refresh_touched_accounts(
        &[
            draft.source.account.id,
            draft.destination.account.id,
        ],
        transaction.transaction_date,
        context.now,
        connection,
    )?;

    tracing::info!(
        "Created {} {transaction_id} of {} {}",
        transaction.transaction_type,
        draft.destination.amount,
        draft.destination.currency.id
    );

    Ok(transaction)
}

/// Replace a transaction and regenerate its ledger rows.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the transaction does not exist or was deleted,
/// - [Error::Conflict] if `expected_updated_at` is stale or another write won the race,
/// - or any error that [create_transaction] can return.
pub fn update_transaction(
    request: UpdateTransactionRequest,
    context: PostingContext,
    connection: &mut Connection,
) -> Result<Transaction, Error> {
    with_write_transaction(connection, |transaction| {
        apply_update(&request, context, transaction)
    })
    .context("failed to update transaction")
}

fn apply_update(
    request: &UpdateTransactionRequest,
    context: PostingContext,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let existing = get_transaction(request.id, connection)?;

    if let Some(expected) = request.expected_updated_at {
        if normalize(expected) != existing.updated_at {
            return Err(Error::Conflict(format!(
                "transaction {} was changed at {}",
                existing.id, existing.updated_at
            )));
        }
    }

    let create_request = request.to_create_request(existing.transaction_date, existing.import_id);
    let mut draft = resolve_request(&create_request, context.config, context.now, connection)?;

    if !request.skip_rules {
        apply_rules(&mut draft, context, connection)?;
    }

    ensure_references(&draft, connection)?;

    // Keep updated_at strictly increasing so that stale reads within the same second are caught.
    let updated_at = context.now.max(existing.updated_at + Duration::SECOND);

    let rows_affected = connection.execute(
        "UPDATE \"transaction\"
         SET type = ?1, source_account_id = ?2, source_amount = ?3, source_currency = ?4,
             source_amount_in_base_currency = ?5, destination_account_id = ?6,
             destination_amount = ?7, destination_currency = ?8,
             destination_amount_in_base_currency = ?9, title = ?10, notes = ?11,
             category_id = ?12, transaction_date = ?13, updated_at = ?14
         WHERE id = ?15 AND updated_at = ?16 AND deleted_at IS NULL",
        rusqlite::params![
            draft.transaction_type,
            draft.source.account.id,
            draft.source.amount.to_string(),
            &draft.source.currency.id,
            draft.source.amount_in_base_currency.to_string(),
            draft.destination.account.id,
            draft.destination.amount.to_string(),
            &draft.destination.currency.id,
            draft.destination.amount_in_base_currency.to_string(),
            &draft.title,
            &draft.notes,
            draft.category_id,
            draft.transaction_date,
            updated_at,
            existing.id,
            existing.updated_at,
        ],
    )?;

    if rows_affected == 0 {
        return Err(Error::Conflict(format!(
            "transaction {} was changed by another writer",
            existing.id
        )));
    }

    set_transaction_tags(existing.id, &draft.tag_ids, connection)?;

    let transaction = get_transaction(existing.id, connection)?;
    delete_double_entries(existing.id, connection)?;
    insert_double_entries(&transaction, &context.config.base_currency, connection)?;

    let mut touched: Vec<AccountId> = [
        existing.source_account_id,
        existing.destination_account_id,
    ]
    .into_iter()
    .flatten()
    .collect();
    touched.push(draft.source.account.id);
    touched.push(draft.destination.account.id);

    refresh_touched_accounts(
        &touched,
        existing.transaction_date.min(transaction.transaction_date),
        context.now,
        connection,
    )?;

    tracing::info!("Updated transaction {}", existing.id);

    Ok(transaction)
}

/// Tombstone transactions and their ledger rows, either all of them or none.
///
/// # Errors
/// Returns [Error::NotFound] if any of the IDs is not a live transaction, in which case nothing
/// is deleted.
pub fn delete_transactions(
    transaction_ids: &[TransactionId],
    now: OffsetDateTime,
    connection: &mut Connection,
) -> Result<(), Error> {
    if transaction_ids.is_empty() {
        return Err(Error::InvalidArgument(
            "no transactions to delete".to_owned(),
        ));
    }

    let now = normalize(now);

    with_write_transaction(connection, |transaction| {
        let mut touched = Vec::new();
        let mut earliest = None;

        for id in transaction_ids {
            let existing = get_transaction(*id, transaction)?;
            touched.extend(existing.source_account_id);
            touched.extend(existing.destination_account_id);
            earliest = Some(match earliest {
                Some(date) if date < existing.transaction_date => date,
                _ => existing.transaction_date,
            });
        }

        let query = format!(
            "UPDATE \"transaction\" SET deleted_at = ?, updated_at = ?
             WHERE deleted_at IS NULL AND id IN ({})",
            placeholders(transaction_ids.len())
        );
        let mut parameters: Vec<&dyn rusqlite::ToSql> = vec![&now, &now];
        parameters.extend(transaction_ids.iter().map(|id| id as &dyn rusqlite::ToSql));
        let rows_affected = transaction.execute(&query, parameters.as_slice())?;

        // Repeated IDs collapse into one row.
        if rows_affected == 0 {
            return Err(Error::NotFound);
        }

        for id in transaction_ids {
            tombstone_double_entries(*id, now, transaction)?;
        }

        if let Some(earliest) = earliest {
            refresh_touched_accounts(&touched, earliest, now, transaction)?;
        }

        tracing::info!("Deleted transactions {transaction_ids:?}");

        Ok(())
    })
    .context("failed to delete transactions")
}

/// Run the default rule group over a draft, keeping only the fields rules may change.
fn apply_rules(
    draft: &mut PostingDraft,
    context: PostingContext,
    connection: &Connection,
) -> Result<(), Error> {
    let rules = list_pipeline_rules(DEFAULT_RULE_GROUP, connection)?;
    if rules.is_empty() {
        return Ok(());
    }

    let view = TransactionView::from(&*draft);
    let outcome = context.rules.run_pipeline(&rules, &view, context.now)?;

    if !outcome.matched.is_empty() {
        tracing::debug!("Rules {:?} matched the transaction", outcome.matched);
    }

    draft.title = outcome.view.title;
    draft.notes = outcome.view.notes;
    draft.category_id = outcome.view.category_id;
    draft.tag_ids = outcome.view.tag_ids;
    draft.tag_ids.sort_unstable();
    draft.tag_ids.dedup();

    Ok(())
}

fn insert_transaction_row(
    draft: &PostingDraft,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<TransactionId, Error> {
    connection
        .execute(
            "INSERT INTO \"transaction\"
                (type, source_account_id, source_amount, source_currency,
                 source_amount_in_base_currency, destination_account_id, destination_amount,
                 destination_currency, destination_amount_in_base_currency, title, notes,
                 category_id, import_id, transaction_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            rusqlite::params![
                draft.transaction_type,
                draft.source.account.id,
                draft.source.amount.to_string(),
                &draft.source.currency.id,
                draft.source.amount_in_base_currency.to_string(),
                draft.destination.account.id,
                draft.destination.amount.to_string(),
                &draft.destination.currency.id,
                draft.destination.amount_in_base_currency.to_string(),
                &draft.title,
                &draft.notes,
                draft.category_id,
                draft.import_id,
                draft.transaction_date,
                now,
            ],
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: _,
                    extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
                },
                _,
            ) => Error::Conflict(format!(
                "a transaction with import id {} already exists",
                draft.import_id.unwrap_or_default()
            )),
            error => error.into(),
        })?;

    Ok(connection.last_insert_rowid())
}

fn refresh_touched_accounts(
    account_ids: &[AccountId],
    from: OffsetDateTime,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let mut account_ids = account_ids.to_vec();
    account_ids.sort_unstable();
    account_ids.dedup();

    for account_id in account_ids {
        refresh_daily_balances(account_id, from.date(), now.date(), connection)?;
    }

    Ok(())
}


#[cfg(test)]
mod update_delete_tests {
    use time::macros::datetime;

    use crate::{
        Config, Error,
        account::{DefaultAccount, get_default_account},
        rule::RuleEngine,
        test_utils::{dec, get_test_connection},
        transaction::{
            CreateTransactionRequest, Transaction, TransactionType, UpdateTransactionRequest,
            get_double_entries, get_transaction,
        },
    };

    use super::{PostingContext, create_transaction, delete_transactions, update_transaction};

    const NOW: time::OffsetDateTime = datetime!(2025-04-01 12:00 UTC);

    fn create(connection: &mut rusqlite::Connection) -> (Transaction, CreateTransactionRequest) {
        let cash = get_default_account(DefaultAccount::Cash, connection).unwrap().id;
        let request =
            CreateTransactionRequest::new(TransactionType::Withdrawal, datetime!(2025-03-30 9:00 UTC))
                .source(cash)
                .source_amount(dec("10"), "USD")
                .title("Lunch");
        let config = Config::default();
        let engine = RuleEngine::new();
        let transaction = create_transaction(
            request.clone(),
            PostingContext::new(&config, &engine, NOW),
            connection,
        )
        .unwrap();

        (transaction, request)
    }

    #[test]
    fn update_regenerates_pair_and_keeps_created_at() {
        let mut connection = get_test_connection();
        let (transaction, request) = create(&mut connection);
        let mut update = UpdateTransactionRequest::replacing(transaction.id, request.source_amount(dec("12"), "USD"));
        update.transaction_date = None;
        update.expected_updated_at = Some(transaction.updated_at);
        let config = Config::default();
        let engine = RuleEngine::new();
        let later = datetime!(2025-04-02 8:00 UTC);

        let updated =
            update_transaction(update, PostingContext::new(&config, &engine, later), &mut connection)
                .unwrap();

        assert_eq!(updated.source_amount, Some(dec("12")));
        assert_eq!(updated.created_at, transaction.created_at);
        assert_eq!(updated.transaction_date, transaction.transaction_date);
        assert_eq!(updated.updated_at, later);
        let entries = get_double_entries(transaction.id, &connection).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, dec("12"));
        assert_eq!(entries[1].amount, dec("-12"));
    }

    #[test]
    fn stale_update_is_conflict() {
        let mut connection = get_test_connection();
        let (transaction, request) = create(&mut connection);
        let config = Config::default();
        let engine = RuleEngine::new();
        let mut first = UpdateTransactionRequest::replacing(transaction.id, request.clone().title("First"));
        first.expected_updated_at = Some(transaction.updated_at);
        let mut second = UpdateTransactionRequest::replacing(transaction.id, request.title("Second"));
        second.expected_updated_at = Some(transaction.updated_at);

        update_transaction(first, PostingContext::new(&config, &engine, NOW), &mut connection).unwrap();
        let result =
            update_transaction(second, PostingContext::new(&config, &engine, NOW), &mut connection);

        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(get_transaction(transaction.id, &connection).unwrap().title, "First");
    }

    #[test]
    fn delete_tombstones_transaction_and_pair() {
        let mut connection = get_test_connection();
        let (transaction, _) = create(&mut connection);

        delete_transactions(&[transaction.id], NOW, &mut connection).unwrap();

        assert_eq!(get_transaction(transaction.id, &connection), Err(Error::NotFound));
        assert!(get_double_entries(transaction.id, &connection).unwrap().is_empty());
        assert_eq!(
            delete_transactions(&[transaction.id], NOW, &mut connection),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn delete_with_unknown_id_changes_nothing() {
        let mut connection = get_test_connection();
        let (transaction, _) = create(&mut connection);

        let result = delete_transactions(&[transaction.id, 999], NOW, &mut connection);

        assert_eq!(result, Err(Error::NotFound));
        assert!(get_transaction(transaction.id, &connection).is_ok());
    }
}
