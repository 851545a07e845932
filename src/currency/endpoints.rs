//! JSON handlers for currencies.

use axum::{Extension, Json, extract::State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AppState, Error,
    auth::AuthContext,
    clock::now_utc,
    currency::{
        Currency, CurrencyData, SyncSummary, convert, create_currency, delete_currency,
        format_amount, get_currencies, sync_rates, update_currency,
    },
};

/// The request body for listing currencies.
#[derive(Debug, Default, Deserialize)]
pub struct GetCurrenciesRequest {
    /// Only these codes, or every currency when empty.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Whether inactive currencies are included.
    #[serde(default)]
    pub include_disabled: bool,
}

/// The request body for deleting a currency.
#[derive(Debug, Deserialize)]
pub struct CurrencyIdRequest {
    /// The ISO code of the currency.
    pub id: String,
}

/// The request body for a conversion.
#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    /// The currency `amount` is in.
    pub from: String,
    /// The currency to convert to.
    pub to: String,
    /// The amount to convert.
    pub amount: Decimal,
}

/// The converted amount.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    /// The amount in the target currency.
    pub amount: Decimal,
}

/// The request body for formatting an amount.
#[derive(Debug, Deserialize)]
pub struct FormatAmountRequest {
    /// The amount to format.
    pub amount: Decimal,
    /// The currency whose decimal places are used.
    pub currency: String,
}

/// The formatted amount.
#[derive(Debug, Serialize)]
pub struct FormatAmountResponse {
    /// The amount rounded to the currency's decimal places.
    pub formatted: String,
}

/// Handle currency creation.
pub async fn create_currency_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(data): Json<CurrencyData>,
) -> Result<Json<Currency>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    create_currency(data, &state.config.base_currency, now_utc(), &connection).map(Json)
}

/// Handle currency updates.
pub async fn update_currency_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(data): Json<CurrencyData>,
) -> Result<Json<Currency>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    update_currency(data, &state.config.base_currency, now_utc(), &connection).map(Json)
}

/// Handle currency deletion.
pub async fn delete_currency_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CurrencyIdRequest>,
) -> Result<Json<()>, Error> {
    auth.require_user()?;
    let connection = state.db.write()?;

    delete_currency(
        &request.id,
        &state.config.base_currency,
        now_utc(),
        &connection,
    )
    .map(Json)
}

/// List currencies.
pub async fn get_currencies_endpoint(
    State(state): State<AppState>,
    Json(request): Json<GetCurrenciesRequest>,
) -> Result<Json<Vec<Currency>>, Error> {
    let connection = state.db.read()?;

    get_currencies(&request.ids, request.include_disabled, &connection).map(Json)
}

/// Convert an amount between two currencies.
pub async fn convert_endpoint(
    State(state): State<AppState>,
    Json(request): Json<ConvertRequest>,
) -> Result<Json<ConvertResponse>, Error> {
    let connection = state.db.read()?;

    let amount = convert(
        &request.from.trim().to_uppercase(),
        &request.to.trim().to_uppercase(),
        request.amount,
        &connection,
    )?;

    Ok(Json(ConvertResponse { amount }))
}

/// Format an amount with its currency's decimal places.
pub async fn format_amount_endpoint(
    State(state): State<AppState>,
    Json(request): Json<FormatAmountRequest>,
) -> Result<Json<FormatAmountResponse>, Error> {
    let connection = state.db.read()?;

    let formatted = format_amount(request.amount, &request.currency, &connection)?;

    Ok(Json(FormatAmountResponse { formatted }))
}

/// Pull the exchange rate feed now instead of waiting for the daily sync.
pub async fn sync_rates_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SyncSummary>, Error> {
    auth.require_user()?;

    let url = state.config.exchange_rates_url.as_deref().ok_or_else(|| {
        Error::InvalidArgument("no exchange rate feed is configured".to_owned())
    })?;

    sync_rates(&state.http_client, url, &state.db, &state.config)
        .await
        .map(Json)
}

#[cfg(test)]
mod currency_endpoint_tests {
    use axum::{Router, http::StatusCode, middleware, routing::post};
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use time::Duration;

    use crate::{
        AppState,
        auth::{TokenType, UserID, auth_middleware},
        clock::now_utc,
        test_utils::dec,
    };

    use super::{
        convert_endpoint, create_currency_endpoint, format_amount_endpoint, sync_rates_endpoint,
    };

    fn server(state: AppState) -> TestServer {
        let app = Router::new()
            .route("/create", post(create_currency_endpoint))
            .route("/convert", post(convert_endpoint))
            .route("/format", post(format_amount_endpoint))
            .route("/sync", post(sync_rates_endpoint))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state);

        TestServer::try_new(app).unwrap()
    }

    fn token(state: &AppState) -> String {
        state
            .tokens
            .generate_token(UserID::new(1), TokenType::Web, Duration::hours(1), now_utc())
            .unwrap()
            .token
    }

    #[tokio::test]
    async fn created_currency_converts() {
        let state = AppState::for_tests();
        let token = token(&state);
        let server = server(state);

        server
            .post("/create")
            .authorization_bearer(&token)
            .json(&json!({ "id": "eur", "rate": "0.5", "decimal_places": 2 }))
            .await
            .assert_status_ok();

        let response = server
            .post("/convert")
            .json(&json!({ "from": "USD", "to": "EUR", "amount": "10" }))
            .await;

        response.assert_status_ok();
        let amount = response.json::<Value>()["amount"].as_str().map(dec);
        assert_eq!(amount, Some(dec("5")));
    }

    #[tokio::test]
    async fn unknown_currency_is_rate_not_found() {
        let server = server(AppState::for_tests());

        let response = server
            .post("/convert")
            .json(&json!({ "from": "USD", "to": "XYZ", "amount": "10" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["code"], "rate_not_found");
    }

    #[tokio::test]
    async fn format_rounds_to_decimal_places() {
        let server = server(AppState::for_tests());

        let response = server
            .post("/format")
            .json(&json!({ "amount": "12.345", "currency": "USD" }))
            .await;

        response.assert_status_ok();
        response.assert_json(&json!({ "formatted": "12.35" }));
    }

    #[tokio::test]
    async fn sync_without_feed_is_invalid() {
        let state = AppState::for_tests();
        let token = token(&state);
        let server = server(state);

        let response = server.post("/sync").authorization_bearer(&token).await;

        response.assert_status(StatusCode::BAD_REQUEST);
    }
}
