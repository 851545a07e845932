//! Opening, initializing and writing to the application's SQLite database.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::{
    Config, Error,
    account::{create_account_table, seed_default_accounts},
    auth::{create_service_token_table, create_user_table},
    category::create_category_table,
    clock::now_utc,
    currency::{create_currency_table, seed_base_currency},
    maintenance::create_daily_balance_table,
    rule::create_rule_table,
    schedule::create_schedule_rule_table,
    tag::create_tag_table,
    transaction::{create_double_entry_table, create_transaction_table},
};

/// How many times a write is attempted when SQLite reports that the database is busy.
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(25);

/// Create all of the application's tables and seed the rows every ledger needs.
///
/// Seeds the base currency with a rate of one and the default accounts. Safe to call on an
/// already initialized database.
///
/// # Errors
/// Returns an error if a table could not be created or a seed row could not be written.
pub fn initialize(connection: &Connection, base_currency: &str) -> Result<(), Error> {
    let transaction = Transaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    create_currency_table(&transaction)?;
    create_account_table(&transaction)?;
    create_category_table(&transaction)?;
    create_tag_table(&transaction)?;
    create_transaction_table(&transaction)?;
    create_double_entry_table(&transaction)?;
    create_daily_balance_table(&transaction)?;
    create_rule_table(&transaction)?;
    create_schedule_rule_table(&transaction)?;
    create_user_table(&transaction)?;
    create_service_token_table(&transaction)?;

    let now = now_utc();
    seed_base_currency(base_currency, now, &transaction)?;
    seed_default_accounts(base_currency, now, &transaction)?;

    transaction.commit()?;

    Ok(())
}

/// The handles used to talk to the database.
///
/// Writes go through `write`. Queries go through `read`, which is a separate read-only
/// connection when [Config::readonly_db_path] is set and the write connection otherwise.
#[derive(Debug, Clone)]
pub struct Database {
    write: Arc<Mutex<Connection>>,
    read: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database files named in `config` and initialize the schema.
    ///
    /// # Errors
    /// Returns an error if a file could not be opened or the schema could not be created.
    pub fn open(config: &Config) -> Result<Self, Error> {
        let connection = Connection::open(&config.db_path)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;

        let database = Self::from_connection(connection, &config.base_currency)?;

        match &config.readonly_db_path {
            Some(path) => {
                let read = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
                )?;
                read.busy_timeout(BUSY_TIMEOUT)?;
                tracing::info!("Opened read-only database at {path}");

                Ok(Self {
                    write: database.write,
                    read: Arc::new(Mutex::new(read)),
                })
            }
            None => Ok(database),
        }
    }

    /// Wrap an open connection, e.g. an in-memory database, and initialize the schema.
    ///
    /// Reads and writes share the connection.
    ///
    /// # Errors
    /// Returns an error if the schema could not be created.
    pub fn from_connection(connection: Connection, base_currency: &str) -> Result<Self, Error> {
        connection.pragma_update(None, "foreign_keys", "ON")?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        initialize(&connection, base_currency)?;

        let connection = Arc::new(Mutex::new(connection));

        Ok(Self {
            write: connection.clone(),
            read: connection,
        })
    }

    /// Lock the connection used for writes.
    ///
    /// # Errors
    /// Returns [Error::DatabaseLockError] if the lock is poisoned.
    pub fn write(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.write.lock().map_err(|error| {
            tracing::error!("could not acquire database lock: {error}");
            Error::DatabaseLockError
        })
    }

    /// Lock the connection used for queries.
    ///
    /// Do not hold this guard while calling [Database::write], the two may be the same lock.
    ///
    /// # Errors
    /// Returns [Error::DatabaseLockError] if the lock is poisoned.
    pub fn read(&self) -> Result<MutexGuard<'_, Connection>, Error> {
        self.read.lock().map_err(|error| {
            tracing::error!("could not acquire database lock: {error}");
            Error::DatabaseLockError
        })
    }
}

/// Run `operation` inside an immediate transaction and commit it.
///
/// The immediate transaction takes SQLite's write lock up front, which serializes writers. When
/// SQLite still reports the database as busy the whole operation is retried, up to
/// [MAX_WRITE_ATTEMPTS] times in total with a jittered back-off. Any other error rolls the
/// transaction back and is returned as is.
///
/// On a multi-threaded Tokio runtime the calling worker hands its other tasks to another thread
/// for the duration, so lock waits and back-off sleeps do not stall them.
///
/// # Errors
/// Returns the first error raised by `operation`, or the SQL error from beginning or committing.
pub fn with_write_transaction<T>(
    connection: &mut Connection,
    operation: impl FnMut(&Transaction) -> Result<T, Error>,
) -> Result<T, Error> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| retry_while_busy(connection, operation))
        }
        _ => retry_while_busy(connection, operation),
    }
}

fn retry_while_busy<T>(
    connection: &mut Connection,
    mut operation: impl FnMut(&Transaction) -> Result<T, Error>,
) -> Result<T, Error> {
    let mut attempt = 1;

    loop {
        let result = run_once(connection, &mut operation);

        match result {
            Err(error) if error.is_busy() && attempt < MAX_WRITE_ATTEMPTS => {
                let delay = retry_delay(attempt);
                tracing::warn!(
                    "database busy on attempt {attempt}/{MAX_WRITE_ATTEMPTS}, retrying in {delay:?}"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// A comma separated list of `count` positional parameters for an `IN (...)` clause.
pub fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn run_once<T>(
    connection: &mut Connection,
    operation: &mut impl FnMut(&Transaction) -> Result<T, Error>,
) -> Result<T, Error> {
    let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = operation(&transaction)?;
    transaction.commit()?;

    Ok(value)
}

fn retry_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY * 2_u32.saturating_pow(attempt.saturating_sub(1));
    let jitter = Duration::from_millis(rand::random::<u64>() % 25);

    base + jitter
}

#[cfg(test)]
mod initialize_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        account::list_accounts,
        currency::get_currency,
        db::{Database, initialize},
    };

    #[test]
    fn initialize_is_idempotent() {
        let connection = Connection::open_in_memory().unwrap();

        initialize(&connection, "USD").expect("first initialize failed");
        initialize(&connection, "USD").expect("second initialize failed");

        let accounts = list_accounts(false, &connection).unwrap();
        assert_eq!(accounts.len(), 6);
    }

    #[test]
    fn initialize_seeds_base_currency_with_rate_one() {
        let connection = Connection::open_in_memory().unwrap();

        initialize(&connection, "NZD").unwrap();

        let currency = get_currency("NZD", &connection).unwrap();
        assert_eq!(currency.rate, rust_decimal::Decimal::ONE);
        assert!(currency.is_active);
    }

    #[test]
    fn in_memory_database_shares_connection() {
        let database = Database::from_connection(Connection::open_in_memory().unwrap(), "USD")
            .expect("could not open database");

        {
            let connection = database.write().unwrap();
            connection
                .execute("INSERT INTO category (name, created_at) VALUES ('Food', '2025-01-01 00:00:00.0+00:00')", ())
                .unwrap();
        }

        let connection = database.read().unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM category", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn failed_write_transaction_rolls_back() {
        let mut connection = Connection::open_in_memory().unwrap();
        initialize(&connection, "USD").unwrap();

        let result: Result<(), Error> = super::with_write_transaction(&mut connection, |tx| {
            tx.execute(
                "INSERT INTO category (name, created_at) VALUES ('Food', '2025-01-01 00:00:00.0+00:00')",
                (),
            )?;
            Err(Error::InvalidArgument("stop".to_owned()))
        });

        assert_eq!(result, Err(Error::InvalidArgument("stop".to_owned())));
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM category", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
