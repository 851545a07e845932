//! Application router configuration.
//!
//! Every route runs behind [auth_middleware], which turns an optional bearer token into an
//! [crate::auth::AuthContext]. Handlers for writes then reject anonymous callers themselves.

use std::time::Duration;

use axum::{Router, middleware, routing::post};
use tower_http::timeout::TimeoutLayer;

use crate::{
    AppState, Error,
    account::{
        create_account_endpoint, create_accounts_bulk_endpoint, delete_account_endpoint,
        get_applicable_accounts_endpoint, list_accounts_endpoint, reorder_accounts_endpoint,
        update_account_endpoint,
    },
    analytics::{get_balance_endpoint, get_debits_and_credits_summary_endpoint},
    auth::{
        auth_middleware, create_service_token_endpoint, create_user_endpoint,
        list_service_tokens_endpoint, log_in_endpoint, revoke_service_token_endpoint,
    },
    category::{
        create_category_endpoint, delete_category_endpoint, list_categories_endpoint,
        update_category_endpoint,
    },
    config::get_configuration_endpoint,
    currency::{
        convert_endpoint, create_currency_endpoint, delete_currency_endpoint,
        format_amount_endpoint, get_currencies_endpoint, sync_rates_endpoint,
        update_currency_endpoint,
    },
    endpoints,
    import::{import_statement_endpoint, parse_statement_endpoint},
    maintenance::{fix_daily_gaps_endpoint, get_daily_balances_endpoint, recalculate_endpoint},
    rule::{
        create_rule_endpoint, delete_rule_endpoint, dry_run_rule_endpoint, list_rules_endpoint,
        update_rule_endpoint,
    },
    schedule::{
        create_schedule_rule_endpoint, delete_schedule_rule_endpoint,
        list_schedule_rules_endpoint, process_due_schedule_rules_endpoint,
        update_schedule_rule_endpoint, validate_cron_expression_endpoint,
    },
    tag::{create_tag_endpoint, delete_tag_endpoint, list_tags_endpoint, update_tag_endpoint},
    transaction::{
        create_transaction_endpoint, create_transactions_bulk_endpoint,
        delete_transactions_endpoint, get_title_suggestions_endpoint, get_transaction_endpoint,
        list_transactions_endpoint, update_transaction_endpoint,
    },
};

/// How long a request may take before the server gives up on it.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route(endpoints::CREATE_USER, post(create_user_endpoint))
        .route(endpoints::LOG_IN, post(log_in_endpoint))
        .route(
            endpoints::CREATE_SERVICE_TOKEN,
            post(create_service_token_endpoint),
        )
        .route(
            endpoints::LIST_SERVICE_TOKENS,
            post(list_service_tokens_endpoint),
        )
        .route(
            endpoints::REVOKE_SERVICE_TOKEN,
            post(revoke_service_token_endpoint),
        )
        .route(
            endpoints::GET_CONFIGURATION,
            post(get_configuration_endpoint),
        );

    let currency_routes = Router::new()
        .route(endpoints::CREATE_CURRENCY, post(create_currency_endpoint))
        .route(endpoints::UPDATE_CURRENCY, post(update_currency_endpoint))
        .route(endpoints::DELETE_CURRENCY, post(delete_currency_endpoint))
        .route(endpoints::GET_CURRENCIES, post(get_currencies_endpoint))
        .route(endpoints::CONVERT, post(convert_endpoint))
        .route(endpoints::FORMAT_AMOUNT, post(format_amount_endpoint))
        .route(endpoints::SYNC_RATES, post(sync_rates_endpoint));

    let account_routes = Router::new()
        .route(endpoints::CREATE_ACCOUNT, post(create_account_endpoint))
        .route(
            endpoints::CREATE_ACCOUNTS_BULK,
            post(create_accounts_bulk_endpoint),
        )
        .route(endpoints::UPDATE_ACCOUNT, post(update_account_endpoint))
        .route(endpoints::DELETE_ACCOUNT, post(delete_account_endpoint))
        .route(endpoints::LIST_ACCOUNTS, post(list_accounts_endpoint))
        .route(endpoints::REORDER_ACCOUNTS, post(reorder_accounts_endpoint))
        .route(
            endpoints::GET_APPLICABLE_ACCOUNTS,
            post(get_applicable_accounts_endpoint),
        )
        .route(endpoints::CREATE_CATEGORY, post(create_category_endpoint))
        .route(endpoints::UPDATE_CATEGORY, post(update_category_endpoint))
        .route(endpoints::DELETE_CATEGORY, post(delete_category_endpoint))
        .route(endpoints::LIST_CATEGORIES, post(list_categories_endpoint))
        .route(endpoints::CREATE_TAG, post(create_tag_endpoint))
        .route(endpoints::UPDATE_TAG, post(update_tag_endpoint))
        .route(endpoints::DELETE_TAG, post(delete_tag_endpoint))
        .route(endpoints::LIST_TAGS, post(list_tags_endpoint));

    let transaction_routes = Router::new()
        .route(
            endpoints::CREATE_TRANSACTION,
            post(create_transaction_endpoint),
        )
        .route(
            endpoints::CREATE_TRANSACTIONS_BULK,
            post(create_transactions_bulk_endpoint),
        )
        .route(
            endpoints::UPDATE_TRANSACTION,
            post(update_transaction_endpoint),
        )
        .route(
            endpoints::DELETE_TRANSACTIONS,
            post(delete_transactions_endpoint),
        )
        .route(endpoints::GET_TRANSACTION, post(get_transaction_endpoint))
        .route(
            endpoints::LIST_TRANSACTIONS,
            post(list_transactions_endpoint),
        )
        .route(
            endpoints::GET_TITLE_SUGGESTIONS,
            post(get_title_suggestions_endpoint),
        )
        .route(endpoints::PARSE_STATEMENT, post(parse_statement_endpoint))
        .route(endpoints::IMPORT_STATEMENT, post(import_statement_endpoint));

    let rule_routes = Router::new()
        .route(endpoints::CREATE_RULE, post(create_rule_endpoint))
        .route(endpoints::UPDATE_RULE, post(update_rule_endpoint))
        .route(endpoints::DELETE_RULE, post(delete_rule_endpoint))
        .route(endpoints::LIST_RULES, post(list_rules_endpoint))
        .route(endpoints::DRY_RUN_RULE, post(dry_run_rule_endpoint))
        .route(
            endpoints::CREATE_SCHEDULE_RULE,
            post(create_schedule_rule_endpoint),
        )
        .route(
            endpoints::UPDATE_SCHEDULE_RULE,
            post(update_schedule_rule_endpoint),
        )
        .route(
            endpoints::DELETE_SCHEDULE_RULE,
            post(delete_schedule_rule_endpoint),
        )
        .route(
            endpoints::LIST_SCHEDULE_RULES,
            post(list_schedule_rules_endpoint),
        )
        .route(
            endpoints::VALIDATE_CRON_EXPRESSION,
            post(validate_cron_expression_endpoint),
        )
        .route(
            endpoints::PROCESS_DUE_SCHEDULE_RULES,
            post(process_due_schedule_rules_endpoint),
        );

    let maintenance_routes = Router::new()
        .route(endpoints::RECALCULATE, post(recalculate_endpoint))
        .route(endpoints::FIX_DAILY_GAPS, post(fix_daily_gaps_endpoint))
        .route(
            endpoints::GET_DAILY_BALANCES,
            post(get_daily_balances_endpoint),
        )
        .route(
            endpoints::GET_DEBITS_AND_CREDITS_SUMMARY,
            post(get_debits_and_credits_summary_endpoint),
        )
        .route(endpoints::GET_BALANCE, post(get_balance_endpoint));

    auth_routes
        .merge(currency_routes)
        .merge(account_routes)
        .merge(transaction_routes)
        .merge(rule_routes)
        .merge(maintenance_routes)
        .fallback(get_404_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

async fn get_404_not_found() -> Error {
    Error::NotFound
}

#[cfg(test)]
mod router_tests {
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{Value, json};

    use crate::{AppState, account::DefaultAccount, endpoints, test_utils::dec};

    use super::build_router;

    const PASSWORD: &str = "correct horse battery staple";

    fn server() -> TestServer {
        TestServer::try_new(build_router(AppState::for_tests())).unwrap()
    }

    async fn log_in(server: &TestServer) -> String {
        server
            .post(endpoints::CREATE_USER)
            .json(&json!({ "login": "alex", "password": PASSWORD }))
            .await
            .assert_status_ok();

        let response = server
            .post(endpoints::LOG_IN)
            .json(&json!({ "login": "alex", "password": PASSWORD }))
            .await;
        response.assert_status_ok();

        response.json::<Value>()["token"]
            .as_str()
            .unwrap()
            .to_owned()
    }

    async fn account_id(server: &TestServer, name: &str) -> i64 {
        server
            .post(endpoints::LIST_ACCOUNTS)
            .json(&json!({}))
            .await
            .json::<Vec<Value>>()
            .into_iter()
            .find(|account| account["name"] == name)
            .and_then(|account| account["id"].as_i64())
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = server().post("/api/nope/nothing").await;

        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["code"], "not_found");
    }

    #[tokio::test]
    async fn anonymous_write_is_forbidden() {
        let response = server()
            .post(endpoints::CREATE_TAG)
            .json(&json!({ "name": "holiday" }))
            .await;

        response.assert_status(StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn configuration_hides_secrets() {
        let response = server().post(endpoints::GET_CONFIGURATION).await;

        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["base_currency"], "USD");
        assert!(body.get("db_path").is_none());
    }

    #[tokio::test]
    async fn withdrawal_moves_money_out_of_cash() {
        let server = server();
        let token = log_in(&server).await;
        let cash = account_id(&server, DefaultAccount::Cash.name()).await;

        let created = server
            .post(endpoints::CREATE_TRANSACTION)
            .authorization_bearer(&token)
            .json(&json!({
                "type": "withdrawal",
                "source_account_id": cash,
                "source_amount": "12.50",
                "title": "Lunch",
                "transaction_date": "2025-05-01T12:00:00Z",
            }))
            .await;
        created.assert_status_ok();

        let balance = server
            .post(endpoints::GET_BALANCE)
            .json(&json!({
                "account_id": cash,
                "at": "2025-05-02T00:00:00Z",
            }))
            .await;

        balance.assert_status_ok();
        let amount = balance.json::<Value>()["amount"].as_str().map(dec);
        assert_eq!(amount, Some(dec("-12.50")));
    }

    #[tokio::test]
    async fn revoked_service_token_is_rejected() {
        let server = server();
        let token = log_in(&server).await;

        let created = server
            .post(endpoints::CREATE_SERVICE_TOKEN)
            .authorization_bearer(&token)
            .json(&json!({ "name": "grafana" }))
            .await
            .json::<Value>();
        let service_token = created["token"].as_str().unwrap().to_owned();

        server
            .post(endpoints::LIST_SERVICE_TOKENS)
            .authorization_bearer(&service_token)
            .await
            .assert_status_ok();

        server
            .post(endpoints::REVOKE_SERVICE_TOKEN)
            .authorization_bearer(&token)
            .json(&json!({ "id": created["id"] }))
            .await
            .assert_status_ok();

        let response = server
            .post(endpoints::LIST_SERVICE_TOKENS)
            .authorization_bearer(&service_token)
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn dry_run_leaves_transaction_alone() {
        let server = server();
        let token = log_in(&server).await;
        let cash = account_id(&server, DefaultAccount::Cash.name()).await;
        let transaction = server
            .post(endpoints::CREATE_TRANSACTION)
            .authorization_bearer(&token)
            .json(&json!({
                "type": "withdrawal",
                "source_account_id": cash,
                "source_amount": "4.50",
                "title": "coffee",
                "transaction_date": "2025-05-01T08:00:00Z",
            }))
            .await
            .json::<Value>();

        let response = server
            .post(endpoints::DRY_RUN_RULE)
            .json(&json!({
                "transaction_id": transaction["id"],
                "script": "tx.set_title(\"Coffee\"); return true;",
            }))
            .await;
        response.assert_status_ok();

        let stored = server
            .post(endpoints::GET_TRANSACTION)
            .json(&json!({ "id": transaction["id"] }))
            .await
            .json::<Value>();
        assert_eq!(stored["title"], "coffee");
    }
}
