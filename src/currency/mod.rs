//! Currencies, exchange rates and the rate feed.

mod core;
mod endpoints;
mod rate_sync;

pub use core::{
    Currency, CurrencyData, convert, convert_with_rates, create_currency, create_currency_table,
    delete_currency, format_amount, get_currencies, get_currency, get_rate,
    normalize_currency_code, seed_base_currency, update_currency,
};
pub use endpoints::{
    convert_endpoint, create_currency_endpoint, delete_currency_endpoint,
    format_amount_endpoint, get_currencies_endpoint, sync_rates_endpoint,
    update_currency_endpoint,
};
pub use rate_sync::{
    RateFeed, SyncSummary, apply_rates, build_http_client, fetch_rates, rebase_rates, sync_rates,
};
