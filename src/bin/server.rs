use std::{
    error::Error,
    fs::{self, OpenOptions},
    net::SocketAddr,
    str::FromStr,
    sync::Arc,
};

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware,
};
use axum_server::Handle;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use moneyflow_rs::{
    AppState, Config, Database, Environment, RuleEngine, Scheduler, SchedulerCommand,
    TokenAuthority, build_router, graceful_shutdown, logging_middleware,
};

/// The JSON API server for moneyflow_rs.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long, env = "DB_PATH")]
    db_path: String,

    /// File path to open read-only for queries, e.g. a replica of the database.
    #[arg(long, env = "READONLY_DB_PATH")]
    readonly_db_path: Option<String>,

    /// The port to serve the API from.
    #[arg(short, long, env = "GRPC_PORT", default_value_t = 52055)]
    port: u16,

    /// The PKCS#1 PEM private key that signs tokens, or a path to it.
    #[arg(long, env = "JWT_PRIVATE_KEY", hide_env_values = true)]
    jwt_private_key: String,

    /// The PEM public key that verifies tokens, or a path to it.
    #[arg(long, env = "JWT_PUBLIC_KEY")]
    jwt_public_key: String,

    /// The URL of the exchange rate feed. Rate sync is disabled when missing.
    #[arg(long, env = "EXCHANGE_RATES_URL")]
    exchange_rates_url: Option<String>,

    /// The ISO code all balances are normalised to.
    #[arg(long, env = "BASE_CURRENCY", default_value = "USD")]
    base_currency: String,

    /// Recompute base currency amounts after every rate sync.
    #[arg(long, env = "UPDATE_TX_AMOUNT_IN_BASE_ON_SYNC", default_value_t = false)]
    update_tx_amount_in_base_on_sync: bool,

    /// Link to the Grafana instance that charts the database.
    #[arg(long, env = "GRAFANA_URL")]
    grafana_url: Option<String>,

    /// One of dev, ci or prod.
    #[arg(long, env = "ENVIRONMENT", default_value = "dev")]
    environment: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_logging()?;

    let args = Args::parse();

    let config = Arc::new(Config {
        environment: Environment::from_str(&args.environment)?,
        db_path: args.db_path,
        readonly_db_path: args.readonly_db_path,
        port: args.port,
        base_currency: args.base_currency.trim().to_uppercase(),
        exchange_rates_url: args.exchange_rates_url,
        update_tx_amount_in_base_on_sync: args.update_tx_amount_in_base_on_sync,
        grafana_url: args.grafana_url,
        ..Default::default()
    });

    let tokens = TokenAuthority::from_pem(
        &read_pem(&args.jwt_private_key)?,
        &read_pem(&args.jwt_public_key)?,
    )?;
    let db = Database::open(&config)?;
    let rules = Arc::new(RuleEngine::new());
    let state = AppState::new(config.clone(), db.clone(), tokens, rules.clone())?;

    let (scheduler, scheduler_handle) =
        Scheduler::new(db, config.clone(), rules, state.http_client.clone())?;
    let scheduler_task = scheduler.spawn();

    let handle = Handle::new();
    tokio::spawn(graceful_shutdown(handle.clone()));

    let router = add_tracing_layer(
        build_router(state).layer(middleware::from_fn(logging_middleware)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        "HTTP server listening on {} in {} mode",
        addr,
        config.environment
    );
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;

    scheduler_handle.send(SchedulerCommand::Shutdown).await?;
    scheduler_task.await?;

    Ok(())
}

/// Keys may be given inline or as a path to a PEM file.
fn read_pem(value: &str) -> Result<String, std::io::Error> {
    if value.trim_start().starts_with("-----BEGIN") {
        Ok(value.to_owned())
    } else {
        fs::read_to_string(value)
    }
}

fn setup_logging() -> Result<(), std::io::Error> {
    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")?;

    let debug_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::new(log_file))
        .with_filter(filter::LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(stdout_log)
        .with(debug_log)
        .init();

    Ok(())
}

fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // Errors are logged where they are turned into responses.
        .on_failure(());

    router.layer(tracing_layer)
}
