//! Moneyflow is a self-hosted service for tracking a household's money.
//!
//! The heart of the library is a ledger engine: every transaction is validated against the
//! account and currency stores, rewritten by user-programmable rules, and persisted together with
//! a balanced pair of double-entry rows in a single database transaction. Around it sit a rate
//! syncer, a cron-driven scheduler for recurring transactions, maintenance jobs that rebuild
//! derived amounts, and token based authentication.
//!
//! The library also provides a JSON API with one route per operation.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod account;
mod analytics;
mod app_state;
mod auth;
mod category;
mod clock;
mod config;
mod currency;
mod database_id;
mod db;
mod decimal;
mod endpoints;
mod import;
mod logging;
mod maintenance;
mod routing;
mod rule;
mod schedule;
mod tag;
mod transaction;
mod transaction_tag;

#[cfg(test)]
mod test_utils;

pub use account::AccountType;
pub use app_state::AppState;
pub use auth::{PasswordHash, TokenAuthority, User, UserID, ValidatedPassword, create_user};
pub use clock::now_utc;
pub use config::{Config, Environment};
pub use db::{Database, initialize as initialize_db};
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use routing::build_router;
pub use rule::{RuleEngine, RuleId, ScriptPosition};
pub use schedule::{Scheduler, SchedulerCommand, SchedulerHandle};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The broad categories of failure that callers of the ledger can rely on.
///
/// Every [Error] maps onto exactly one kind, see [Error::kind].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Validation failed, a decimal was malformed or a required field was missing.
    InvalidArgument,
    /// The entity is absent or has been deleted.
    NotFound,
    /// A unique constraint was violated or an update was based on a stale read.
    Conflict,
    /// A protected operation was called without a user.
    PermissionDenied,
    /// A token was invalid, expired or revoked.
    Unauthenticated,
    /// A rule script failed at runtime.
    RuleExecutionError,
    /// A currency conversion was missing one of its rates.
    RateNotFound,
    /// The database or some other piece of infrastructure failed.
    Internal,
}

impl ErrorKind {
    /// The machine readable code sent to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::RuleExecutionError => "rule_execution_error",
            ErrorKind::RateNotFound => "rate_not_found",
            ErrorKind::Internal => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidArgument | ErrorKind::RateNotFound => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::RuleExecutionError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The caller supplied a value that failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A string could not be parsed as a decimal number.
    #[error("could not parse \"{0}\" as a decimal number")]
    InvalidDecimal(String),

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// An account with the same name and type already exists.
    #[error("the {account_type} account \"{name}\" already exists")]
    DuplicateAccount {
        /// The name of the rejected account.
        name: String,
        /// The type of the rejected account.
        account_type: AccountType,
    },

    /// A category with the same name already exists.
    #[error("the category \"{0}\" already exists")]
    DuplicateCategory(String),

    /// A tag with the same name already exists.
    #[error("the tag \"{0}\" already exists")]
    DuplicateTag(String),

    /// A currency with the same code already exists.
    #[error("the currency \"{0}\" already exists")]
    DuplicateCurrency(String),

    /// A user with the same login already exists.
    #[error("the login \"{0}\" is already taken")]
    DuplicateLogin(String),

    /// The write was based on a stale read, or collided with a unique constraint.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A write operation was called without an authenticated user.
    #[error("permission denied")]
    PermissionDenied,

    /// A bearer token failed validation.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The login or password did not match a registered user.
    #[error("invalid login or password")]
    InvalidCredentials,

    /// The user provided a password that is too easy to guess.
    #[error("password is too weak: {0}")]
    TooWeak(String),

    /// An unexpected error occurred with the underlying hashing library.
    ///
    /// The error string should only be logged for debugging on the server.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// A rule script could not be compiled.
    #[error("rule {rule_id} failed to compile: {message}")]
    RuleCompileError {
        /// The rule that failed to compile, zero for unsaved rules.
        rule_id: RuleId,
        /// What the compiler complained about.
        message: String,
    },

    /// A rule script failed while running.
    #[error("rule {rule_id} failed at {position}: {message}")]
    RuleExecutionError {
        /// The rule that failed, zero for unsaved rules.
        rule_id: RuleId,
        /// Where in the script the failure happened.
        position: ScriptPosition,
        /// What went wrong.
        message: String,
    },

    /// A rule script explicitly rejected the transaction.
    #[error("rule {rule_id} rejected the transaction: {reason}")]
    RuleRejected {
        /// The rule that rejected the transaction.
        rule_id: RuleId,
        /// The reason given by the script.
        reason: String,
    },

    /// A conversion needed the rate of a currency that does not exist.
    #[error("no exchange rate found for currency \"{0}\"")]
    RateNotFound(String),

    /// A cron expression did not follow the 5-field grammar.
    #[error("invalid cron expression \"{expression}\": {reason}")]
    InvalidCronExpression {
        /// The rejected expression.
        expression: String,
        /// Why the expression was rejected.
        reason: String,
    },

    /// An HTTP request to an external service failed.
    #[error("network error: {0}")]
    NetworkError(String),

    /// An external service returned a response that could not be decoded.
    #[error("could not decode response: {0}")]
    DecodeError(String),

    /// A token could not be signed.
    #[error("could not create token: {0}")]
    TokenCreation(String),

    /// A signing or verification key could not be loaded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The CSV had issues that prevented it from being parsed.
    #[error("could not parse the CSV file: {0}")]
    InvalidCSV(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// An error occurred while serializing or deserializing JSON.
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),

    /// An infrastructure error together with a short description of what was being attempted.
    #[error("{context}: {source}")]
    Context {
        /// What was being attempted, e.g. "failed to create transaction".
        context: String,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// The contract level kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_)
            | Error::InvalidDecimal(_)
            | Error::TooWeak(_)
            | Error::RuleCompileError { .. }
            | Error::RuleRejected { .. }
            | Error::InvalidCronExpression { .. }
            | Error::InvalidCSV(_) => ErrorKind::InvalidArgument,
            Error::NotFound => ErrorKind::NotFound,
            Error::DuplicateAccount { .. }
            | Error::DuplicateCategory(_)
            | Error::DuplicateTag(_)
            | Error::DuplicateCurrency(_)
            | Error::DuplicateLogin(_)
            | Error::Conflict(_) => ErrorKind::Conflict,
            Error::PermissionDenied => ErrorKind::PermissionDenied,
            Error::Unauthenticated(_) | Error::InvalidCredentials => ErrorKind::Unauthenticated,
            Error::RuleExecutionError { .. } => ErrorKind::RuleExecutionError,
            Error::RateNotFound(_) => ErrorKind::RateNotFound,
            Error::Context { source, .. } => source.kind(),
            Error::HashingError(_)
            | Error::NetworkError(_)
            | Error::DecodeError(_)
            | Error::TokenCreation(_)
            | Error::InvalidKey(_)
            | Error::SqlError(_)
            | Error::DatabaseLockError
            | Error::JSONSerializationError(_) => ErrorKind::Internal,
        }
    }

    /// Whether the error is SQLite reporting that another writer holds the database.
    ///
    /// These errors are safe to retry.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::SqlError(rusqlite::Error::SqliteFailure(error, _)) => matches!(
                error.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Error::Context { source, .. } => source.is_busy(),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::JSONSerializationError(value.to_string())
    }
}

/// Attach a short description to infrastructure errors.
///
/// Validation and lookup errors are passed through untouched so that callers see them verbatim.
pub trait ErrorContext<T> {
    /// Wrap an [ErrorKind::Internal] error in [Error::Context].
    fn context(self, context: &str) -> Result<T, Error>;
}

impl<T> ErrorContext<T> for Result<T, Error> {
    fn context(self, context: &str) -> Result<T, Error> {
        self.map_err(|error| match error.kind() {
            ErrorKind::Internal => Error::Context {
                context: context.to_owned(),
                source: Box::new(error),
            },
            _ => error,
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let kind = self.kind();

        let message = match kind {
            // Internal errors are not intended to be shown to the client.
            ErrorKind::Internal => {
                tracing::error!("An unexpected error occurred: {}", self);
                "an unexpected error occurred, check the server logs for more details".to_owned()
            }
            _ => self.to_string(),
        };

        (
            kind.status_code(),
            Json(json!({
                "code": kind.code(),
                "message": message,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod error_tests {
    use crate::{Error, ErrorContext, ErrorKind};

    #[test]
    fn context_wraps_internal_errors() {
        let result: Result<(), Error> = Err(Error::DatabaseLockError);

        let got = result.context("failed to create transaction");

        let error = got.unwrap_err();
        assert_eq!(
            error.to_string(),
            "failed to create transaction: could not acquire the database lock"
        );
        assert_eq!(error.kind(), ErrorKind::Internal);
    }

    #[test]
    fn context_passes_validation_errors_through() {
        let result: Result<(), Error> = Err(Error::InvalidArgument("bad".to_owned()));

        let got = result.context("failed to create transaction");

        assert_eq!(got, Err(Error::InvalidArgument("bad".to_owned())));
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let error: Error = rusqlite::Error::QueryReturnedNoRows.into();

        assert_eq!(error, Error::NotFound);
    }
}
