//! Implements a struct that holds the state of the REST server.

use std::sync::Arc;

use crate::{
    Config, Error, auth::TokenAuthority, currency::build_http_client, db::Database,
    rule::RuleEngine,
};

/// The state shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The settings frozen at start up.
    pub config: Arc<Config>,
    /// The database connections.
    pub db: Database,
    /// Signs and validates bearer tokens.
    pub tokens: Arc<TokenAuthority>,
    /// Runs rule scripts and caches their compiled programs.
    pub rules: Arc<RuleEngine>,
    /// The client used for the exchange rate feed.
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Create a new [AppState].
    ///
    /// # Errors
    /// Returns an error if the HTTP client could not be built.
    pub fn new(
        config: Arc<Config>,
        db: Database,
        tokens: TokenAuthority,
        rules: Arc<RuleEngine>,
    ) -> Result<Self, Error> {
        Ok(Self {
            config,
            db,
            tokens: Arc::new(tokens),
            rules,
            http_client: build_http_client()?,
        })
    }

    /// A state backed by an in-memory database and the fixture keys.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        use rusqlite::Connection;

        use crate::test_utils::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};

        let config = Config::default();
        let connection = Connection::open_in_memory().expect("could not open in-memory database");
        let db = Database::from_connection(connection, &config.base_currency)
            .expect("could not initialize test database");
        let tokens = TokenAuthority::from_pem(TEST_PRIVATE_KEY, TEST_PUBLIC_KEY)
            .expect("could not load test keys");

        Self::new(Arc::new(config), db, tokens, Arc::new(RuleEngine::new()))
            .expect("could not build test state")
    }
}
