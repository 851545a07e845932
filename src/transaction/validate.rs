//! Turns a request into a fully resolved transaction draft.

use rusqlite::Connection;
use rust_decimal::Decimal;
use time::{Duration, OffsetDateTime};

use crate::{
    Config, Error,
    account::{Account, AccountId, DefaultAccount, applicability, get_account, get_default_account},
    category::{CategoryId, get_category},
    clock::normalize,
    currency::{Currency, convert, convert_with_rates, get_currency},
    decimal::round_to,
    tag::{TagId, ensure_tags_exist},
    transaction::{CreateTransactionRequest, TransactionType},
};

/// One side of a draft after its account and currency were looked up.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSide {
    /// The live account on this side.
    pub account: Account,
    /// The positive (or, for reconciliations and adjustments, signed) amount.
    pub amount: Decimal,
    /// The currency of the account.
    pub currency: Currency,
    /// `amount` in the base currency.
    pub amount_in_base_currency: Decimal,
}

/// A validated transaction that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingDraft {
    /// The kind of movement.
    pub transaction_type: TransactionType,
    /// Where the money came from.
    pub source: ResolvedSide,
    /// Where the money went.
    pub destination: ResolvedSide,
    /// A short description.
    pub title: String,
    /// Free form notes.
    pub notes: String,
    /// The category the transaction belongs to.
    pub category_id: Option<CategoryId>,
    /// The tags on the transaction, sorted and without repeats.
    pub tag_ids: Vec<TagId>,
    /// When the money moved.
    pub transaction_date: OffsetDateTime,
    /// The hash of the statement row the transaction was imported from.
    pub import_id: Option<i64>,
}

/// The account used for a side the request leaves out, if the transaction type has one.
fn default_source(transaction_type: TransactionType) -> Option<DefaultAccount> {
    match transaction_type {
        TransactionType::Deposit => Some(DefaultAccount::Income),
        TransactionType::Reconciliation => Some(DefaultAccount::Reconciliation),
        TransactionType::Adjustment => Some(DefaultAccount::Adjustment),
        TransactionType::Withdrawal | TransactionType::TransferBetweenAccounts => None,
    }
}

fn default_destination(transaction_type: TransactionType) -> Option<DefaultAccount> {
    match transaction_type {
        TransactionType::Withdrawal => Some(DefaultAccount::Expense),
        _ => None,
    }
}

fn resolve_account(
    account_id: Option<AccountId>,
    default_account: Option<DefaultAccount>,
    side: &str,
    transaction_type: TransactionType,
    connection: &Connection,
) -> Result<Account, Error> {
    match (account_id, default_account) {
        (Some(account_id), _) => match get_account(account_id, connection) {
            Err(Error::NotFound) => Err(Error::InvalidArgument(format!(
                "the {side} account {account_id} does not exist"
            ))),
            result => result,
        },
        (None, Some(default_account)) => match get_default_account(default_account, connection) {
            Err(Error::NotFound) => Err(Error::InvalidArgument(format!(
                "the default account \"{}\" has been deleted",
                default_account.name()
            ))),
            result => result,
        },
        (None, None) => Err(Error::InvalidArgument(format!(
            "a {transaction_type} needs a {side} account"
        ))),
    }
}

/// Look up an active currency, checking it against the account's currency.
fn resolve_currency(
    requested: Option<&str>,
    account: &Account,
    connection: &Connection,
) -> Result<Currency, Error> {
    if let Some(requested) = requested {
        if !requested.trim().eq_ignore_ascii_case(&account.currency) {
            return Err(Error::InvalidArgument(format!(
                "the account \"{}\" is kept in {}, not {}",
                account.name,
                account.currency,
                requested.trim()
            )));
        }
    }

    let currency = match get_currency(&account.currency, connection) {
        Err(Error::NotFound) => {
            return Err(Error::InvalidArgument(format!(
                "the currency {} does not exist",
                account.currency
            )));
        }
        result => result?,
    };

    if !currency.is_active {
        return Err(Error::InvalidArgument(format!(
            "the currency {} is not active",
            currency.id
        )));
    }

    Ok(currency)
}

fn check_amount(transaction_type: TransactionType, amount: Decimal) -> Result<(), Error> {
    if transaction_type.allows_negative_amounts() {
        if amount.is_zero() {
            return Err(Error::InvalidArgument(format!(
                "the amount of a {transaction_type} cannot be zero"
            )));
        }
    } else if amount <= Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "the amount of a {transaction_type} must be positive, got {amount}"
        )));
    }

    Ok(())
}

/// Fill in whichever amount is missing by converting the other one.
fn resolve_amounts(
    request: &CreateTransactionRequest,
    source_currency: &Currency,
    destination_currency: &Currency,
) -> Result<(Decimal, Decimal), Error> {
    let converted = |amount: Decimal, from: &Currency, to: &Currency| {
        convert_with_rates(amount, from.rate, to.rate).map(|amount| round_to(amount, to.decimal_places))
    };

    let (source_amount, destination_amount) =
        match (request.source_amount, request.destination_amount) {
            (Some(source), Some(destination)) => (source, destination),
            (Some(source), None) => (
                source,
                converted(source, source_currency, destination_currency)?,
            ),
            (None, Some(destination)) => (
                converted(destination, destination_currency, source_currency)?,
                destination,
            ),
            (None, None) => {
                return Err(Error::InvalidArgument(
                    "a transaction needs a source or destination amount".to_owned(),
                ));
            }
        };

    if source_currency.id == destination_currency.id && source_amount != destination_amount {
        return Err(Error::InvalidArgument(format!(
            "both sides are in {} but the amounts {source_amount} and {destination_amount} differ",
            source_currency.id
        )));
    }

    if source_amount.is_sign_negative() != destination_amount.is_sign_negative() {
        return Err(Error::InvalidArgument(
            "the source and destination amounts must have the same sign".to_owned(),
        ));
    }

    Ok((source_amount, destination_amount))
}

/// Compute the base currency amount of each side.
///
/// A side kept in the base currency provides the base amount of both sides. When neither side is
/// in the base currency, each side is converted on its own. Results are rounded to the base
/// currency's decimal places.
///
/// # Errors
/// Returns [Error::RateNotFound] if a currency has no rate.
pub fn compute_base_amounts(
    source: (Decimal, &str),
    destination: (Decimal, &str),
    base_currency: &str,
    connection: &Connection,
) -> Result<(Decimal, Decimal), Error> {
    let (source_amount, source_currency) = source;
    let (destination_amount, destination_currency) = destination;

    let (source_base, destination_base) = if source_currency == base_currency {
        (source_amount, source_amount)
    } else if destination_currency == base_currency {
        (destination_amount, destination_amount)
    } else {
        (
            convert(source_currency, base_currency, source_amount, connection)?,
            convert(destination_currency, base_currency, destination_amount, connection)?,
        )
    };

    let decimal_places = match get_currency(base_currency, connection) {
        Ok(currency) => currency.decimal_places,
        Err(Error::NotFound) => return Err(Error::RateNotFound(base_currency.to_owned())),
        Err(error) => return Err(error),
    };

    Ok((
        round_to(source_base, decimal_places),
        round_to(destination_base, decimal_places),
    ))
}

/// Validate `request` and resolve its accounts, currencies and amounts.
///
/// # Errors
/// Returns [Error::InvalidArgument] for every validation failure and [Error::RateNotFound] if a
/// conversion is missing a rate.
pub fn resolve_request(
    request: &CreateTransactionRequest,
    config: &Config,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<PostingDraft, Error> {
    let transaction_type = request.transaction_type;
    let transaction_date = normalize(request.transaction_date);

    let latest_date = now + Duration::days(config.max_future_days);
    if transaction_date > latest_date {
        return Err(Error::InvalidArgument(format!(
            "the transaction date {transaction_date} is more than {} days in the future",
            config.max_future_days
        )));
    }

    let source_account = resolve_account(
        request.source_account_id,
        default_source(transaction_type),
        "source",
        transaction_type,
        connection,
    )?;
    let destination_account = resolve_account(
        request.destination_account_id,
        default_destination(transaction_type),
        "destination",
        transaction_type,
        connection,
    )?;

    let rules = applicability(transaction_type);
    if !rules.allows_source(source_account.account_type) {
        return Err(Error::InvalidArgument(format!(
            "a {transaction_type} cannot take money from the {} account \"{}\"",
            source_account.account_type, source_account.name
        )));
    }
    if !rules.allows_destination(destination_account.account_type) {
        return Err(Error::InvalidArgument(format!(
            "a {transaction_type} cannot move money into the {} account \"{}\"",
            destination_account.account_type, destination_account.name
        )));
    }
    if source_account.id == destination_account.id {
        return Err(Error::InvalidArgument(
            "the source and destination accounts must be different".to_owned(),
        ));
    }

    let source_currency = resolve_currency(
        request.source_currency.as_deref(),
        &source_account,
        connection,
    )?;
    let destination_currency = resolve_currency(
        request.destination_currency.as_deref(),
        &destination_account,
        connection,
    )?;

    let (source_amount, destination_amount) =
        resolve_amounts(request, &source_currency, &destination_currency)?;
    check_amount(transaction_type, source_amount)?;
    check_amount(transaction_type, destination_amount)?;

    let (source_base, destination_base) = compute_base_amounts(
        (source_amount, &source_currency.id),
        (destination_amount, &destination_currency.id),
        &config.base_currency,
        connection,
    )?;

    let mut tag_ids = request.tag_ids.clone();
    tag_ids.sort_unstable();
    tag_ids.dedup();

    Ok(PostingDraft {
        transaction_type,
        source: ResolvedSide {
            account: source_account,
            amount: source_amount,
            currency: source_currency,
            amount_in_base_currency: source_base,
        },
        destination: ResolvedSide {
            account: destination_account,
            amount: destination_amount,
            currency: destination_currency,
            amount_in_base_currency: destination_base,
        },
        title: request.title.trim().to_owned(),
        notes: request.notes.clone(),
        category_id: request.category_id,
        tag_ids,
        transaction_date,
        import_id: request.import_id,
    })
}

/// Check that the category and tags of a draft refer to live rows.
///
/// Runs after the rule engine, which may have changed them.
pub fn ensure_references(draft: &PostingDraft, connection: &Connection) -> Result<(), Error> {
    if let Some(category_id) = draft.category_id {
        match get_category(category_id, connection) {
            Err(Error::NotFound) => {
                return Err(Error::InvalidArgument(format!(
                    "category {category_id} does not exist"
                )));
            }
            result => {
                result?;
            }
        }
    }

    ensure_tags_exist(&draft.tag_ids, connection)
}

#[cfg(test)]
mod resolve_request_tests {
    use rusqlite::Connection;
    use time::macros::datetime;

    use crate::{
        Config, Error,
        account::{
            AccountId, AccountType, DefaultAccount, NewAccount, create_account,
            get_default_account,
        },
        currency::{CurrencyData, create_currency, update_currency},
        test_utils::{dec, get_test_connection},
        transaction::{CreateTransactionRequest, TransactionType},
    };

    use super::resolve_request;

    const NOW: time::OffsetDateTime = datetime!(2025-04-01 12:00 UTC);

    fn add_currency(code: &str, rate: &str, connection: &Connection) {
        create_currency(
            CurrencyData {
                id: code.to_owned(),
                rate: dec(rate),
                decimal_places: 2,
                is_active: true,
            },
            "USD",
            NOW,
            connection,
        )
        .unwrap();
    }

    fn add_account(name: &str, account_type: AccountType, currency: &str, connection: &Connection) -> AccountId {
        create_account(NewAccount::new(name, account_type, currency), NOW, connection)
            .unwrap()
            .id
    }

    fn cash(connection: &Connection) -> AccountId {
        get_default_account(DefaultAccount::Cash, connection).unwrap().id
    }

    #[test]
    fn withdrawal_defaults_destination_to_default_expense() {
        let connection = get_test_connection();
        let request = CreateTransactionRequest::new(TransactionType::Withdrawal, NOW)
            .source(cash(&connection))
            .source_amount(dec("12.50"), "USD");

        let draft = resolve_request(&request, &Config::default(), NOW, &connection).unwrap();

        assert_eq!(draft.destination.account.name, "Default Expense");
        assert_eq!(draft.destination.amount, dec("12.50"));
        assert_eq!(draft.source.amount_in_base_currency, dec("12.50"));
        assert_eq!(draft.destination.amount_in_base_currency, dec("12.50"));
    }

    #[test]
    fn deposit_converts_amount_into_default_income_currency() {
        let connection = get_test_connection();
        add_currency("EUR", "0.8", &connection);
        let euro_account = add_account("Euro Savings", AccountType::Asset, "EUR", &connection);
        let request = CreateTransactionRequest::new(TransactionType::Deposit, NOW)
            .destination(euro_account)
            .destination_amount(dec("80.00"), "EUR");

        let draft = resolve_request(&request, &Config::default(), NOW, &connection).unwrap();

        assert_eq!(draft.source.account.name, "Default Income");
        assert_eq!(draft.source.amount, dec("100.00"));
        assert_eq!(draft.source.amount_in_base_currency, dec("100.00"));
        assert_eq!(draft.destination.amount_in_base_currency, dec("100.00"));
    }

    #[test]
    fn cross_currency_transfer_uses_base_side() {
        let connection = get_test_connection();
        add_currency("EUR", "0.8", &connection);
        let usd = add_account("USD Checking", AccountType::Asset, "USD", &connection);
        let eur = add_account("EUR Checking", AccountType::Asset, "EUR", &connection);
        let request = CreateTransactionRequest::new(TransactionType::TransferBetweenAccounts, NOW)
            .source(usd)
            .source_amount(dec("100.00"), "USD")
            .destination(eur)
            .destination_amount(dec("80.00"), "EUR");

        let draft = resolve_request(&request, &Config::default(), NOW, &connection).unwrap();

        assert_eq!(draft.source.amount_in_base_currency, dec("100"));
        assert_eq!(draft.destination.amount_in_base_currency, dec("100"));
    }

    #[test]
    fn foreign_sides_are_converted_independently() {
        let connection = get_test_connection();
        add_currency("EUR", "0.8", &connection);
        add_currency("GBP", "0.5", &connection);
        let eur = add_account("EUR Checking", AccountType::Asset, "EUR", &connection);
        let gbp = add_account("GBP Checking", AccountType::Asset, "GBP", &connection);
        let request = CreateTransactionRequest::new(TransactionType::TransferBetweenAccounts, NOW)
            .source(eur)
            .source_amount(dec("80.00"), "EUR")
            .destination(gbp)
            .destination_amount(dec("51.00"), "GBP");

        let draft = resolve_request(&request, &Config::default(), NOW, &connection).unwrap();

        assert_eq!(draft.source.amount_in_base_currency, dec("100.00"));
        assert_eq!(draft.destination.amount_in_base_currency, dec("102.00"));
    }

    #[test]
    fn applicability_is_enforced() {
        let connection = get_test_connection();
        let income = get_default_account(DefaultAccount::Income, &connection).unwrap().id;
        let request = CreateTransactionRequest::new(TransactionType::Withdrawal, NOW)
            .source(income)
            .source_amount(dec("5"), "USD");

        let result = resolve_request(&request, &Config::default(), NOW, &connection);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn transfer_needs_two_accounts() {
        let connection = get_test_connection();
        let cash = cash(&connection);
        let request = CreateTransactionRequest::new(TransactionType::TransferBetweenAccounts, NOW)
            .source(cash)
            .destination(cash)
            .source_amount(dec("5"), "USD");

        let result = resolve_request(&request, &Config::default(), NOW, &connection);

        assert_eq!(
            result,
            Err(Error::InvalidArgument(
                "the source and destination accounts must be different".to_owned()
            ))
        );
    }

    #[test]
    fn amounts_must_be_positive() {
        let connection = get_test_connection();
        let request = CreateTransactionRequest::new(TransactionType::Withdrawal, NOW)
            .source(cash(&connection))
            .source_amount(dec("-3"), "USD");

        let result = resolve_request(&request, &Config::default(), NOW, &connection);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn adjustments_may_be_negative_but_not_zero() {
        let connection = get_test_connection();
        let negative = CreateTransactionRequest::new(TransactionType::Adjustment, NOW)
            .destination(cash(&connection))
            .destination_amount(dec("-3"), "USD");
        let zero = CreateTransactionRequest::new(TransactionType::Adjustment, NOW)
            .destination(cash(&connection))
            .destination_amount(dec("0"), "USD");

        let draft = resolve_request(&negative, &Config::default(), NOW, &connection).unwrap();

        assert_eq!(draft.source.account.name, "Default Adjustment");
        assert_eq!(draft.source.amount, dec("-3"));
        assert!(matches!(
            resolve_request(&zero, &Config::default(), NOW, &connection),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn far_future_dates_are_rejected() {
        let connection = get_test_connection();
        let request =
            CreateTransactionRequest::new(TransactionType::Withdrawal, datetime!(2027-01-01 0:00 UTC))
                .source(cash(&connection))
                .source_amount(dec("1"), "USD");

        let result = resolve_request(&request, &Config::default(), NOW, &connection);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn currency_must_match_account() {
        let connection = get_test_connection();
        add_currency("EUR", "0.8", &connection);
        let request = CreateTransactionRequest::new(TransactionType::Withdrawal, NOW)
            .source(cash(&connection))
            .source_amount(dec("1"), "EUR");

        let result = resolve_request(&request, &Config::default(), NOW, &connection);

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn inactive_currency_is_rejected() {
        let connection = get_test_connection();
        add_currency("EUR", "0.8", &connection);
        let eur = add_account("EUR Checking", AccountType::Asset, "EUR", &connection);
        update_currency(
            CurrencyData {
                id: "EUR".to_owned(),
                rate: dec("0.8"),
                decimal_places: 2,
                is_active: false,
            },
            "USD",
            NOW,
            &connection,
        )
        .unwrap();
        let request = CreateTransactionRequest::new(TransactionType::Withdrawal, NOW)
            .source(eur)
            .source_amount(dec("1"), "EUR");

        let result = resolve_request(&request, &Config::default(), NOW, &connection);

        assert_eq!(
            result,
            Err(Error::InvalidArgument("the currency EUR is not active".to_owned()))
        );
    }
}
