//! Users, registration and log-in.

use std::fmt::Display;

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{
    Error,
    auth::{PasswordHash, TokenAuthority, TokenType, ValidatedPassword},
};

/// A newtype wrapper for integer user IDs.
///
/// Zero is reserved for anonymous requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct UserID(i64);

impl UserID {
    /// The ID of requests that carry no token.
    pub const ANONYMOUS: UserID = UserID(0);

    /// Create a new user ID.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Cast the user ID to a 64 bit integer.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for UserID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A user of the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    /// The user's ID in the application database.
    pub id: UserID,
    /// The name the user logs in with.
    pub login: String,
    /// The user's password hash.
    #[serde(skip)]
    pub password_hash: PasswordHash,
    /// When the user registered.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// The response to a successful log-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogInResponse {
    /// The user that logged in.
    pub user_id: UserID,
    /// The web token to send as `Authorization: Bearer <token>`.
    pub token: String,
    /// When the token stops working.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Create the user table.
///
/// # Errors
///
/// This function will return an error if the SQL query failed.
pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS user (
            id INTEGER PRIMARY KEY,
            login TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password TEXT NOT NULL,
            created_at TEXT NOT NULL
        );",
    )?;

    Ok(())
}

fn map_user_row(row: &Row) -> Result<User, rusqlite::Error> {
    let raw_password_hash: String = row.get(2)?;

    Ok(User {
        id: UserID::new(row.get(0)?),
        login: row.get(1)?,
        password_hash: PasswordHash::new_unchecked(&raw_password_hash),
        created_at: row.get(3)?,
    })
}

/// Insert a user with an already hashed password.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if the login is empty,
/// - [Error::DuplicateLogin] if the login is taken, ignoring case,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_user(
    login: &str,
    password_hash: PasswordHash,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<User, Error> {
    let login = login.trim();
    if login.is_empty() {
        return Err(Error::InvalidArgument("login cannot be empty".to_owned()));
    }

    connection
        .execute(
            "INSERT INTO user (login, password, created_at) VALUES (?1, ?2, ?3)",
            (login, password_hash.as_str(), now),
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(sql_error, Some(_))
                if sql_error.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Error::DuplicateLogin(login.to_owned())
            }
            error => error.into(),
        })?;

    let id = UserID::new(connection.last_insert_rowid());
    tracing::info!("Registered user {id} \"{login}\"");

    Ok(User {
        id,
        login: login.to_owned(),
        password_hash,
        created_at: now,
    })
}

/// Check the strength of `raw_password`, hash it with `cost` and create the user.
///
/// # Errors
/// Returns [Error::TooWeak] for guessable passwords and any error of [create_user].
pub fn register_user(
    login: &str,
    raw_password: &str,
    cost: u32,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<User, Error> {
    let password = ValidatedPassword::new(raw_password, &[login.trim()])?;
    let password_hash = PasswordHash::new(password, cost)?;

    create_user(login, password_hash, now, connection)
}

/// Get the user with the ID `user_id`.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such user.
pub fn get_user_by_id(user_id: UserID, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare("SELECT id, login, password, created_at FROM user WHERE id = ?1")?
        .query_row([user_id.as_i64()], map_user_row)
        .map_err(|error| error.into())
}

/// Get the user that logs in with `login`, ignoring case.
///
/// # Errors
/// Returns [Error::NotFound] if there is no such user.
pub fn get_user_by_login(login: &str, connection: &Connection) -> Result<User, Error> {
    connection
        .prepare("SELECT id, login, password, created_at FROM user WHERE login = ?1")?
        .query_row([login.trim()], map_user_row)
        .map_err(|error| error.into())
}

/// Check a login and password and issue a web token valid for `ttl`.
///
/// # Errors
/// Returns [Error::InvalidCredentials] if the login is unknown or the password is wrong.
pub fn log_in(
    login: &str,
    raw_password: &str,
    authority: &TokenAuthority,
    ttl: Duration,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<LogInResponse, Error> {
    let user = match get_user_by_login(login, connection) {
        Ok(user) => user,
        Err(Error::NotFound) => {
            tracing::debug!("Log-in attempt for unknown login \"{login}\"");
            return Err(Error::InvalidCredentials);
        }
        Err(error) => return Err(error),
    };

    if !user.password_hash.verify(raw_password)? {
        tracing::debug!("Wrong password for user {}", user.id);
        return Err(Error::InvalidCredentials);
    }

    let issued = authority.generate_token(user.id, TokenType::Web, ttl, now)?;

    Ok(LogInResponse {
        user_id: user.id,
        token: issued.token,
        expires_at: now + ttl,
    })
}

#[cfg(test)]
mod user_tests {
    use time::{Duration, macros::datetime};

    use crate::{
        Error,
        auth::{PasswordHash, TokenAuthority, ValidatedPassword},
        test_utils::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY, get_test_connection},
    };

    use super::{create_user, get_user_by_id, get_user_by_login, log_in, register_user};

    const NOW: time::OffsetDateTime = datetime!(2025-08-01 12:00 UTC);
    const PASSWORD: &str = "correct horse battery staple";

    fn hash() -> PasswordHash {
        PasswordHash::new(ValidatedPassword::new_unchecked(PASSWORD), 4).unwrap()
    }

    #[test]
    fn created_user_can_be_fetched() {
        let connection = get_test_connection();

        let user = create_user("alex", hash(), NOW, &connection).unwrap();

        assert_eq!(get_user_by_id(user.id, &connection), Ok(user.clone()));
        assert_eq!(get_user_by_login("ALEX", &connection), Ok(user));
    }

    #[test]
    fn login_is_unique_ignoring_case() {
        let connection = get_test_connection();
        create_user("alex", hash(), NOW, &connection).unwrap();

        let result = create_user("Alex", hash(), NOW, &connection);

        assert_eq!(result, Err(Error::DuplicateLogin("Alex".to_owned())));
    }

    #[test]
    fn register_rejects_weak_password() {
        let connection = get_test_connection();

        let result = register_user("alex", "alex1234", 4, NOW, &connection);

        assert!(matches!(result, Err(Error::TooWeak(_))));
    }

    #[test]
    fn log_in_issues_a_web_token() {
        let connection = get_test_connection();
        let authority = TokenAuthority::from_pem(TEST_PRIVATE_KEY, TEST_PUBLIC_KEY).unwrap();
        let user = register_user("alex", PASSWORD, 4, NOW, &connection).unwrap();

        let response =
            log_in("alex", PASSWORD, &authority, Duration::days(7), NOW, &connection).unwrap();

        let claims = authority
            .validate_token(&response.token, NOW, &connection)
            .unwrap();
        assert_eq!(claims.user_id, user.id);
        assert_eq!(response.expires_at, NOW + Duration::days(7));
    }

    #[test]
    fn log_in_rejects_wrong_password_and_unknown_login() {
        let connection = get_test_connection();
        let authority = TokenAuthority::from_pem(TEST_PRIVATE_KEY, TEST_PUBLIC_KEY).unwrap();
        create_user("alex", hash(), NOW, &connection).unwrap();

        let wrong_password =
            log_in("alex", "hunter2", &authority, Duration::days(7), NOW, &connection);
        let unknown = log_in("sam", PASSWORD, &authority, Duration::days(7), NOW, &connection);

        assert_eq!(wrong_password, Err(Error::InvalidCredentials));
        assert_eq!(unknown, Err(Error::InvalidCredentials));
    }
}
