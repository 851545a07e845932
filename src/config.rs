//! Process wide settings.
//!
//! A [Config] is built once at start up by the server binary and then shared read-only through
//! [crate::AppState]. Tests build their own with [Config::default].

use std::{fmt::Display, str::FromStr};

use axum::{Json, extract::State};
use serde::Serialize;
use time::Duration;

use crate::{AppState, Error};

/// The deployment the process is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// A developer's machine.
    Dev,
    /// Continuous integration.
    Ci,
    /// Production.
    Prod,
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "ci" => Ok(Environment::Ci),
            "prod" => Ok(Environment::Prod),
            other => Err(Error::InvalidArgument(format!(
                "unknown environment \"{other}\", expected one of dev, ci or prod"
            ))),
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Environment::Dev => "dev",
            Environment::Ci => "ci",
            Environment::Prod => "prod",
        };

        write!(f, "{name}")
    }
}

/// Settings that are frozen after start up.
///
/// Signing keys live in [crate::TokenAuthority].
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// The deployment the process is running in.
    pub environment: Environment,
    /// File path to the SQLite database used for writes.
    pub db_path: String,
    /// File path to open read-only for queries, if different from `db_path`.
    pub readonly_db_path: Option<String>,
    /// The port that the API listens on.
    pub port: u16,
    /// The ISO code that all balances are normalised to.
    pub base_currency: String,
    /// Decimal places given to currencies first seen in a rate feed.
    pub default_decimal_places: u32,
    /// The URL of the exchange rate feed, rate sync is disabled when missing.
    pub exchange_rates_url: Option<String>,
    /// Whether a rate sync also recomputes the base currency amounts of every transaction.
    pub update_tx_amount_in_base_on_sync: bool,
    /// Link to the Grafana instance that charts the database, shown to clients.
    pub grafana_url: Option<String>,
    /// How far into the future a transaction may be dated.
    pub max_future_days: i64,
    /// How long web tokens issued at log-in stay valid.
    pub web_token_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            db_path: "moneyflow.db".to_owned(),
            readonly_db_path: None,
            port: 52055,
            base_currency: "USD".to_owned(),
            default_decimal_places: 2,
            exchange_rates_url: None,
            update_tx_amount_in_base_on_sync: false,
            grafana_url: None,
            max_future_days: 365,
            web_token_ttl: Duration::days(7),
        }
    }
}

/// The parts of [Config] that may be shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicConfiguration {
    /// The deployment the process is running in.
    pub environment: Environment,
    /// The ISO code that all balances are normalised to.
    pub base_currency: String,
    /// Whether a rate sync also recomputes base currency amounts.
    pub update_tx_amount_in_base_on_sync: bool,
    /// Whether rates are synced from a remote feed.
    pub rate_sync_enabled: bool,
    /// Link to the Grafana instance, if any.
    pub grafana_url: Option<String>,
    /// How far into the future a transaction may be dated.
    pub max_future_days: i64,
}

impl Config {
    /// The non-secret view of the configuration.
    pub fn public(&self) -> PublicConfiguration {
        PublicConfiguration {
            environment: self.environment,
            base_currency: self.base_currency.clone(),
            update_tx_amount_in_base_on_sync: self.update_tx_amount_in_base_on_sync,
            rate_sync_enabled: self.exchange_rates_url.is_some(),
            grafana_url: self.grafana_url.clone(),
            max_future_days: self.max_future_days,
        }
    }
}

/// Return the non-secret configuration.
pub async fn get_configuration_endpoint(
    State(state): State<AppState>,
) -> Json<PublicConfiguration> {
    Json(state.config.public())
}
