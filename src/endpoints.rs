//! The API endpoint URIs.
//!
//! Every operation is a `POST` to `/api/<service>/<operation>` with a JSON body.

/// The route for creating a user.
pub const CREATE_USER: &str = "/api/auth/create_user";
/// The route for logging in a user.
pub const LOG_IN: &str = "/api/auth/log_in";
/// The route for issuing a service token.
pub const CREATE_SERVICE_TOKEN: &str = "/api/auth/create_service_token";
/// The route for listing the caller's service tokens.
pub const LIST_SERVICE_TOKENS: &str = "/api/auth/list_service_tokens";
/// The route for revoking a service token.
pub const REVOKE_SERVICE_TOKEN: &str = "/api/auth/revoke_service_token";

/// The route for the non-secret configuration.
pub const GET_CONFIGURATION: &str = "/api/config/get_configuration";

/// The route for creating a currency.
pub const CREATE_CURRENCY: &str = "/api/currency/create_currency";
/// The route for updating a currency.
pub const UPDATE_CURRENCY: &str = "/api/currency/update_currency";
/// The route for deleting a currency.
pub const DELETE_CURRENCY: &str = "/api/currency/delete_currency";
/// The route for listing currencies.
pub const GET_CURRENCIES: &str = "/api/currency/get_currencies";
/// The route for converting an amount.
pub const CONVERT: &str = "/api/currency/convert";
/// The route for formatting an amount.
pub const FORMAT_AMOUNT: &str = "/api/currency/format_amount";
/// The route for pulling the exchange rate feed.
pub const SYNC_RATES: &str = "/api/currency/sync_rates";

/// The route for creating an account.
pub const CREATE_ACCOUNT: &str = "/api/account/create_account";
/// The route for creating several accounts.
pub const CREATE_ACCOUNTS_BULK: &str = "/api/account/create_accounts_bulk";
/// The route for updating an account.
pub const UPDATE_ACCOUNT: &str = "/api/account/update_account";
/// The route for deleting an account.
pub const DELETE_ACCOUNT: &str = "/api/account/delete_account";
/// The route for listing accounts.
pub const LIST_ACCOUNTS: &str = "/api/account/list_accounts";
/// The route for reordering accounts.
pub const REORDER_ACCOUNTS: &str = "/api/account/reorder_accounts";
/// The route for the accounts a transaction type may use.
pub const GET_APPLICABLE_ACCOUNTS: &str = "/api/account/get_applicable_accounts";

/// The route for creating a category.
pub const CREATE_CATEGORY: &str = "/api/category/create_category";
/// The route for renaming a category.
pub const UPDATE_CATEGORY: &str = "/api/category/update_category";
/// The route for deleting a category.
pub const DELETE_CATEGORY: &str = "/api/category/delete_category";
/// The route for listing categories.
pub const LIST_CATEGORIES: &str = "/api/category/list_categories";

/// The route for creating a tag.
pub const CREATE_TAG: &str = "/api/tag/create_tag";
/// The route for updating a tag.
pub const UPDATE_TAG: &str = "/api/tag/update_tag";
/// The route for deleting a tag.
pub const DELETE_TAG: &str = "/api/tag/delete_tag";
/// The route for listing tags.
pub const LIST_TAGS: &str = "/api/tag/list_tags";

/// The route for creating a transaction.
pub const CREATE_TRANSACTION: &str = "/api/transaction/create_transaction";
/// The route for creating several transactions.
pub const CREATE_TRANSACTIONS_BULK: &str = "/api/transaction/create_transactions_bulk";
/// The route for updating a transaction.
pub const UPDATE_TRANSACTION: &str = "/api/transaction/update_transaction";
/// The route for deleting transactions.
pub const DELETE_TRANSACTIONS: &str = "/api/transaction/delete_transactions";
/// The route for fetching one transaction.
pub const GET_TRANSACTION: &str = "/api/transaction/get_transaction";
/// The route for listing transactions.
pub const LIST_TRANSACTIONS: &str = "/api/transaction/list_transactions";
/// The route for title suggestions.
pub const GET_TITLE_SUGGESTIONS: &str = "/api/transaction/get_title_suggestions";

/// The route for creating a rule.
pub const CREATE_RULE: &str = "/api/rule/create_rule";
/// The route for updating a rule.
pub const UPDATE_RULE: &str = "/api/rule/update_rule";
/// The route for deleting a rule.
pub const DELETE_RULE: &str = "/api/rule/delete_rule";
/// The route for listing rules.
pub const LIST_RULES: &str = "/api/rule/list_rules";
/// The route for running a rule without saving anything.
pub const DRY_RUN_RULE: &str = "/api/rule/dry_run";

/// The route for creating a schedule rule.
pub const CREATE_SCHEDULE_RULE: &str = "/api/schedule/create_schedule_rule";
/// The route for updating a schedule rule.
pub const UPDATE_SCHEDULE_RULE: &str = "/api/schedule/update_schedule_rule";
/// The route for deleting a schedule rule.
pub const DELETE_SCHEDULE_RULE: &str = "/api/schedule/delete_schedule_rule";
/// The route for listing schedule rules.
pub const LIST_SCHEDULE_RULES: &str = "/api/schedule/list_schedule_rules";
/// The route for checking a cron expression.
pub const VALIDATE_CRON_EXPRESSION: &str = "/api/schedule/validate_cron_expression";
/// The route for running the due schedule rules now.
pub const PROCESS_DUE_SCHEDULE_RULES: &str = "/api/schedule/process_due";

/// The route for recomputing base currency amounts.
pub const RECALCULATE: &str = "/api/maintenance/recalculate";
/// The route for filling missing daily balances.
pub const FIX_DAILY_GAPS: &str = "/api/maintenance/fix_daily_gaps";
/// The route for listing daily balances.
pub const GET_DAILY_BALANCES: &str = "/api/maintenance/get_daily_balances";

/// The route for the debit and credit summary.
pub const GET_DEBITS_AND_CREDITS_SUMMARY: &str = "/api/analytics/get_debits_and_credits_summary";
/// The route for an account balance.
pub const GET_BALANCE: &str = "/api/analytics/get_balance";

/// The route for previewing a statement import.
pub const PARSE_STATEMENT: &str = "/api/import/parse_statement";
/// The route for importing a statement.
pub const IMPORT_STATEMENT: &str = "/api/import/import_statement";

/// Every route, used to check that they are all valid URIs.
#[cfg(test)]
pub const ALL: &[&str] = &[
    CREATE_USER,
    LOG_IN,
    CREATE_SERVICE_TOKEN,
    LIST_SERVICE_TOKENS,
    REVOKE_SERVICE_TOKEN,
    GET_CONFIGURATION,
    CREATE_CURRENCY,
    UPDATE_CURRENCY,
    DELETE_CURRENCY,
    GET_CURRENCIES,
    CONVERT,
    FORMAT_AMOUNT,
    SYNC_RATES,
    CREATE_ACCOUNT,
    CREATE_ACCOUNTS_BULK,
    UPDATE_ACCOUNT,
    DELETE_ACCOUNT,
    LIST_ACCOUNTS,
    REORDER_ACCOUNTS,
    GET_APPLICABLE_ACCOUNTS,
    CREATE_CATEGORY,
    UPDATE_CATEGORY,
    DELETE_CATEGORY,
    LIST_CATEGORIES,
    CREATE_TAG,
    UPDATE_TAG,
    DELETE_TAG,
    LIST_TAGS,
    CREATE_TRANSACTION,
    CREATE_TRANSACTIONS_BULK,
    UPDATE_TRANSACTION,
    DELETE_TRANSACTIONS,
    GET_TRANSACTION,
    LIST_TRANSACTIONS,
    GET_TITLE_SUGGESTIONS,
    CREATE_RULE,
    UPDATE_RULE,
    DELETE_RULE,
    LIST_RULES,
    DRY_RUN_RULE,
    CREATE_SCHEDULE_RULE,
    UPDATE_SCHEDULE_RULE,
    DELETE_SCHEDULE_RULE,
    LIST_SCHEDULE_RULES,
    VALIDATE_CRON_EXPRESSION,
    PROCESS_DUE_SCHEDULE_RULES,
    RECALCULATE,
    FIX_DAILY_GAPS,
    GET_DAILY_BALANCES,
    GET_DEBITS_AND_CREDITS_SUMMARY,
    GET_BALANCE,
    PARSE_STATEMENT,
    IMPORT_STATEMENT,
];

// These tests are here so that we know building a `Uri` from a route will not panic.
#[cfg(test)]
mod endpoints_tests {
    use std::collections::HashSet;

    use axum::http::Uri;

    use super::ALL;

    #[test]
    fn endpoints_are_valid_uris() {
        for endpoint in ALL {
            assert!(endpoint.parse::<Uri>().is_ok(), "{endpoint} is not a valid URI");
        }
    }

    #[test]
    fn endpoints_follow_service_operation_layout() {
        for endpoint in ALL {
            let parts: Vec<&str> = endpoint.trim_start_matches('/').split('/').collect();

            assert_eq!(parts.len(), 3, "{endpoint}");
            assert_eq!(parts[0], "api", "{endpoint}");
        }
    }

    #[test]
    fn endpoints_are_unique() {
        let unique: HashSet<&&str> = ALL.iter().collect();

        assert_eq!(unique.len(), ALL.len());
    }
}
