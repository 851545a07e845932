//! Fetch exchange rates from a remote feed and store them.

use std::{collections::BTreeMap, time::Duration};

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    Config, Error, ErrorContext,
    clock::now_utc,
    currency::normalize_currency_code,
    db::{Database, with_write_transaction},
    decimal::parse_decimal,
    maintenance::recalculate_amount_in_base_currency_for_all,
};

/// How long a request to the rate feed may take.
pub const RATE_FEED_TIMEOUT: Duration = Duration::from_secs(30);

/// Precision kept when rates are re-based onto a different base currency.
const REBASED_RATE_DECIMAL_PLACES: u32 = 12;

/// The JSON document returned by the exchange rate feed.
///
/// Accepts both `{"base_code", "conversion_rates"}` and the shorter `{"base", "rates"}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateFeed {
    /// The currency the feed's rates are relative to.
    #[serde(alias = "base_code")]
    pub base: String,
    /// How much of each currency one unit of `base` buys.
    #[serde(alias = "conversion_rates")]
    pub rates: BTreeMap<String, serde_json::Number>,
}

/// What a rate sync changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    /// Existing currencies whose rate was overwritten.
    pub updated: usize,
    /// Currencies seen for the first time.
    pub inserted: usize,
    /// Transactions whose base currency amounts were recomputed, if enabled.
    pub recalculated: Option<usize>,
}

/// Build the HTTP client used for the rate feed.
///
/// # Errors
/// Returns [Error::NetworkError] if the TLS backend could not be initialized.
pub fn build_http_client() -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(RATE_FEED_TIMEOUT)
        .build()
        .map_err(|error| Error::NetworkError(error.to_string()))
}

/// Download and decode the rate feed at `url`.
///
/// # Errors
/// This function will return a:
/// - [Error::NetworkError] if the request fails or the status is not 200,
/// - or [Error::DecodeError] if the body is not a rate feed.
pub async fn fetch_rates(client: &reqwest::Client, url: &str) -> Result<RateFeed, Error> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| Error::NetworkError(error.to_string()))?;

    if response.status() != reqwest::StatusCode::OK {
        return Err(Error::NetworkError(format!(
            "rate feed responded with status {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|error| Error::NetworkError(error.to_string()))?;

    serde_json::from_str(&body).map_err(|error| Error::DecodeError(error.to_string()))
}

/// Convert the feed's rates into rates relative to `base_currency`.
///
/// Codes that are malformed or have a non-positive rate are skipped with a warning.
///
/// # Errors
/// Returns [Error::DecodeError] if a rate is not a number, or if the feed uses another base and
/// does not list `base_currency`.
pub fn rebase_rates(feed: &RateFeed, base_currency: &str) -> Result<Vec<(String, Decimal)>, Error> {
    let mut rates = Vec::with_capacity(feed.rates.len());

    for (code, number) in &feed.rates {
        let code = match normalize_currency_code(code) {
            Ok(code) => code,
            Err(_) => {
                tracing::warn!("Skipping malformed currency code \"{code}\" in rate feed");
                continue;
            }
        };

        let rate = parse_decimal(&number.to_string())
            .map_err(|_| Error::DecodeError(format!("the rate for {code} is not a number")))?;

        if rate <= Decimal::ZERO {
            tracing::warn!("Skipping non-positive rate {rate} for {code} in rate feed");
            continue;
        }

        rates.push((code, rate));
    }

    let feed_base = feed.base.trim().to_uppercase();
    if feed_base == base_currency {
        return Ok(rates);
    }

    let base_rate = rates
        .iter()
        .find(|(code, _)| code == base_currency)
        .map(|(_, rate)| *rate)
        .ok_or_else(|| {
            Error::DecodeError(format!(
                "the feed is based on {feed_base} and has no rate for {base_currency}"
            ))
        })?;

    rates
        .into_iter()
        .map(|(code, rate)| {
            rate.checked_div(base_rate)
                .map(|rebased| (code.clone(), rebased.round_dp(REBASED_RATE_DECIMAL_PLACES)))
                .ok_or_else(|| Error::DecodeError(format!("could not re-base the rate for {code}")))
        })
        .collect()
}

/// Upsert the rates in `feed` using `connection`, which should be a transaction.
///
/// The base currency keeps its rate of one. New codes get [Config::default_decimal_places]. When
/// [Config::update_tx_amount_in_base_on_sync] is set, the base currency amounts of every
/// transaction are recomputed with the new rates before returning.
pub fn apply_rates(
    feed: &RateFeed,
    config: &Config,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<SyncSummary, Error> {
    let rates = rebase_rates(feed, &config.base_currency)?;

    let mut summary = SyncSummary {
        updated: 0,
        inserted: 0,
        recalculated: None,
    };

    let mut exists_statement = connection.prepare("SELECT 1 FROM currency WHERE id = ?1")?;
    let mut upsert_statement = connection.prepare(
        "INSERT INTO currency (id, rate, decimal_places, is_active, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4)
         ON CONFLICT(id) DO UPDATE SET rate = excluded.rate, updated_at = excluded.updated_at",
    )?;

    for (code, rate) in rates {
        if code == config.base_currency {
            continue;
        }

        if exists_statement.exists([&code])? {
            summary.updated += 1;
        } else {
            summary.inserted += 1;
        }

        upsert_statement.execute((&code, rate.to_string(), config.default_decimal_places, now))?;
    }

    tracing::info!(
        "Rate sync updated {} and inserted {} currencies",
        summary.updated,
        summary.inserted
    );

    if config.update_tx_amount_in_base_on_sync {
        let count = recalculate_amount_in_base_currency_for_all(connection, &config.base_currency)?;
        summary.recalculated = Some(count);
    }

    Ok(summary)
}

/// Fetch the feed at `url` and store its rates in one database transaction.
///
/// # Errors
/// Returns network and decode errors from [fetch_rates], or the first database error, in which
/// case no rate is changed.
pub async fn sync_rates(
    client: &reqwest::Client,
    url: &str,
    database: &Database,
    config: &Config,
) -> Result<SyncSummary, Error> {
    tracing::info!("Syncing exchange rates from {url}");

    let feed = fetch_rates(client, url).await?;

    let mut connection = database.write()?;
    with_write_transaction(&mut connection, |transaction| {
        apply_rates(&feed, config, now_utc(), transaction)
    })
    .context("failed to sync exchange rates")
}

#[cfg(test)]
mod rate_feed_tests {
    use crate::test_utils::dec;

    use super::{RateFeed, rebase_rates};

    #[test]
    fn decodes_long_and_short_field_names() {
        let long: RateFeed =
            serde_json::from_str(r#"{"base_code": "USD", "conversion_rates": {"EUR": 0.92}}"#)
                .unwrap();
        let short: RateFeed =
            serde_json::from_str(r#"{"base": "USD", "rates": {"EUR": 0.92}}"#).unwrap();

        assert_eq!(long, short);
    }

    #[test]
    fn rates_are_rebased_onto_base_currency() {
        let feed: RateFeed =
            serde_json::from_str(r#"{"base": "EUR", "rates": {"EUR": 1, "USD": 1.25, "GBP": 0.85}}"#)
                .unwrap();

        let rates = rebase_rates(&feed, "USD").unwrap();

        assert!(rates.contains(&("EUR".to_owned(), dec("0.8"))));
        assert!(rates.contains(&("USD".to_owned(), dec("1"))));
        assert!(rates.contains(&("GBP".to_owned(), dec("0.68"))));
    }

    #[test]
    fn rebase_fails_without_base_currency() {
        let feed: RateFeed =
            serde_json::from_str(r#"{"base": "EUR", "rates": {"GBP": 0.85}}"#).unwrap();

        let result = rebase_rates(&feed, "USD");

        assert!(matches!(result, Err(crate::Error::DecodeError(_))));
    }
}

#[cfg(test)]
mod sync_rates_tests {
    use axum::{Json, Router, http::StatusCode, routing::get};
    use rusqlite::Connection;
    use serde_json::json;

    use crate::{
        Config, Error,
        account::{AccountType, NewAccount, create_account},
        currency::{CurrencyData, create_currency, get_currency},
        db::Database,
        rule::RuleEngine,
        test_utils::dec,
        transaction::{
            CreateTransactionRequest, PostingContext, TransactionType, create_transaction,
            get_double_entries, get_transaction,
        },
    };

    use super::{build_http_client, sync_rates};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{address}/rates")
    }

    fn database() -> Database {
        Database::from_connection(Connection::open_in_memory().unwrap(), "USD").unwrap()
    }

    #[tokio::test]
    async fn sync_upserts_rates_and_keeps_base_at_one() {
        let url = serve(Router::new().route(
            "/rates",
            get(|| async {
                Json(json!({
                    "base_code": "USD",
                    "conversion_rates": {"USD": 1, "EUR": 0.9, "JPY": 151.2}
                }))
            }),
        ))
        .await;
        let database = database();
        {
            let connection = database.write().unwrap();
            create_currency(
                CurrencyData {
                    id: "EUR".to_owned(),
                    rate: dec("0.85"),
                    decimal_places: 2,
                    is_active: true,
                },
                "USD",
                crate::clock::now_utc(),
                &connection,
            )
            .unwrap();
        }

        let summary = sync_rates(&build_http_client().unwrap(), &url, &database, &Config::default())
            .await
            .expect("sync failed");

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.recalculated, None);
        let connection = database.read().unwrap();
        assert_eq!(get_currency("EUR", &connection).unwrap().rate, dec("0.9"));
        assert_eq!(get_currency("JPY", &connection).unwrap().rate, dec("151.2"));
        assert_eq!(get_currency("USD", &connection).unwrap().rate, dec("1"));
    }

    #[tokio::test]
    async fn sync_can_rewrite_base_amounts_of_transactions() {
        let url = serve(Router::new().route(
            "/rates",
            get(|| async {
                Json(json!({
                    "base_code": "USD",
                    "conversion_rates": {"USD": 1, "EUR": 0.9}
                }))
            }),
        ))
        .await;
        let database = database();
        let config = Config {
            update_tx_amount_in_base_on_sync: true,
            ..Default::default()
        };
        let transaction = {
            let mut connection = database.write().unwrap();
            let now = crate::clock::now_utc();
            create_currency(
                CurrencyData {
                    id: "EUR".to_owned(),
                    rate: dec("0.85"),
                    decimal_places: 2,
                    is_active: true,
                },
                "USD",
                now,
                &connection,
            )
            .unwrap();
            let checking =
                create_account(NewAccount::new("Giro", AccountType::Asset, "EUR"), now, &connection)
                    .unwrap();
            let savings = create_account(
                NewAccount::new("Tagesgeld", AccountType::Asset, "EUR"),
                now,
                &connection,
            )
            .unwrap();
            let engine = RuleEngine::new();
            let request =
                CreateTransactionRequest::new(TransactionType::TransferBetweenAccounts, now)
                    .source(checking.id)
                    .source_amount(dec("85"), "EUR")
                    .destination(savings.id);
            create_transaction(
                request,
                PostingContext::new(&config, &engine, now),
                &mut connection,
            )
            .unwrap()
        };
        assert_eq!(transaction.source_amount_in_base_currency, Some(dec("100")));

        let summary = sync_rates(&build_http_client().unwrap(), &url, &database, &config)
            .await
            .expect("sync failed");

        assert_eq!(summary.recalculated, Some(1));
        let connection = database.read().unwrap();
        let updated = get_transaction(transaction.id, &connection).unwrap();
        assert_eq!(updated.source_amount_in_base_currency, Some(dec("94.44")));
        assert_eq!(updated.destination_amount_in_base_currency, Some(dec("94.44")));
        let entries = get_double_entries(transaction.id, &connection).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].amount_in_base_currency + entries[1].amount_in_base_currency,
            dec("0")
        );
        assert!(
            entries
                .iter()
                .all(|entry| entry.amount_in_base_currency.abs() == dec("94.44"))
        );
    }

    #[tokio::test]
    async fn non_200_response_is_network_error() {
        let url = serve(Router::new().route(
            "/rates",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;

        let result =
            sync_rates(&build_http_client().unwrap(), &url, &database(), &Config::default()).await;

        assert!(matches!(result, Err(Error::NetworkError(_))));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let url = serve(Router::new().route("/rates", get(|| async { "not json" }))).await;

        let result =
            sync_rates(&build_http_client().unwrap(), &url, &database(), &Config::default()).await;

        assert!(matches!(result, Err(Error::DecodeError(_))));
    }
}
