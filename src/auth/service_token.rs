//! Long lived tokens for scripts and integrations, and their revocation list.

use rusqlite::{Connection, Row};
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::{
    Error,
    auth::{TokenAuthority, TokenType, UserID},
};

/// Database identifier for a service token.
pub type ServiceTokenId = i64;

/// A service token as listed to its owner. The token itself is only shown once.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceToken {
    /// The ID of the row.
    pub id: ServiceTokenId,
    /// The user the token acts for.
    pub user_id: UserID,
    /// A label chosen by the user.
    pub name: String,
    /// The `jti` claim of the token.
    pub jti: String,
    /// When the token was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the token expires.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// A newly created service token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedServiceToken {
    /// The stored row.
    #[serde(flatten)]
    pub service_token: ServiceToken,
    /// The encoded bearer token.
    pub token: String,
}

/// Create the service_token and jti_revocation tables.
pub fn create_service_token_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute_batch(
        "CREATE TABLE IF NOT EXISTS service_token (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES user(id),
            name TEXT NOT NULL,
            jti TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            deleted_at TEXT
        );

        CREATE TABLE IF NOT EXISTS jti_revocation (
            jti TEXT PRIMARY KEY,
            revoked_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );",
    )?;

    Ok(())
}

fn map_service_token_row(row: &Row) -> Result<ServiceToken, rusqlite::Error> {
    Ok(ServiceToken {
        id: row.get(0)?,
        user_id: UserID::new(row.get(1)?),
        name: row.get(2)?,
        jti: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
    })
}

/// Issue a service token for `user_id` that is valid for `ttl`.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidArgument] if the name is empty or `ttl` is not positive,
/// - [Error::TokenCreation] if the token could not be signed,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_service_token(
    user_id: UserID,
    name: &str,
    ttl: Duration,
    authority: &TokenAuthority,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<CreatedServiceToken, Error> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidArgument(
            "service token name cannot be empty".to_owned(),
        ));
    }

    if !ttl.is_positive() {
        return Err(Error::InvalidArgument(
            "service token lifetime must be positive".to_owned(),
        ));
    }

    let issued = authority.generate_token(user_id, TokenType::ServiceToken, ttl, now)?;
    let expires_at = now + ttl;

    let service_token = connection
        .prepare(
            "INSERT INTO service_token (user_id, name, jti, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, user_id, name, jti, created_at, expires_at",
        )?
        .query_row(
            (user_id.as_i64(), name, &issued.claims.jti, now, expires_at),
            map_service_token_row,
        )?;

    tracing::info!(
        "Created service token {} \"{name}\" for user {user_id}",
        service_token.id
    );

    Ok(CreatedServiceToken {
        service_token,
        token: issued.token,
    })
}

/// The live service tokens of a user, newest first.
pub fn list_service_tokens(
    user_id: UserID,
    connection: &Connection,
) -> Result<Vec<ServiceToken>, Error> {
    connection
        .prepare(
            "SELECT id, user_id, name, jti, created_at, expires_at FROM service_token
             WHERE user_id = ?1 AND deleted_at IS NULL
             ORDER BY id DESC",
        )?
        .query_map([user_id.as_i64()], map_service_token_row)?
        .map(|maybe_token| maybe_token.map_err(|error| error.into()))
        .collect()
}

/// How long a revocation outlives the expiry of the token it revokes.
pub const REVOCATION_RETENTION: Duration = Duration::days(7);

/// Revoke one of `user_id`'s service tokens.
///
/// The revocation is stored until [REVOCATION_RETENTION] after the token would have expired
/// anyway, and the token row is tombstoned.
///
/// # Errors
/// Returns [Error::NotFound] if the user has no live service token with the ID.
pub fn revoke_service_token(
    token_id: ServiceTokenId,
    user_id: UserID,
    authority: &TokenAuthority,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<(), Error> {
    let service_token = connection
        .prepare(
            "SELECT id, user_id, name, jti, created_at, expires_at FROM service_token
             WHERE id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
        )?
        .query_row((token_id, user_id.as_i64()), map_service_token_row)?;

    connection.execute(
        "INSERT OR REPLACE INTO jti_revocation (jti, revoked_at, expires_at) VALUES (?1, ?2, ?3)",
        (
            &service_token.jti,
            now,
            service_token.expires_at + REVOCATION_RETENTION,
        ),
    )?;
    connection.execute(
        "UPDATE service_token SET deleted_at = ?1 WHERE id = ?2",
        (now, token_id),
    )?;

    authority.remember_revocation(&service_token.jti, now);
    tracing::info!("Revoked service token {token_id} of user {user_id}");

    Ok(())
}

/// Whether `jti` is on the revocation list.
pub fn is_revoked(jti: &str, connection: &Connection) -> Result<bool, Error> {
    connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM jti_revocation WHERE jti = ?1)",
            [jti],
            |row| row.get(0),
        )
        .map_err(|error| error.into())
}

/// Drop revocations whose retention period has elapsed by `now`.
///
/// Returns how many revocations were removed.
pub fn purge_expired_revocations(
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<usize, Error> {
    let purged = connection.execute("DELETE FROM jti_revocation WHERE expires_at <= ?1", [now])?;

    if purged > 0 {
        tracing::info!("Purged {purged} expired token revocations");
    }

    Ok(purged)
}

#[cfg(test)]
mod service_token_tests {
    use rusqlite::Connection;
    use time::{Duration, macros::datetime};

    use crate::{
        Error,
        auth::{
            PasswordHash, TokenAuthority, User, UserID, ValidatedPassword, create_user,
            is_revoked,
        },
        test_utils::{TEST_PRIVATE_KEY, TEST_PUBLIC_KEY, get_test_connection},
    };

    use super::{
        create_service_token, list_service_tokens, purge_expired_revocations,
        revoke_service_token,
    };

    const NOW: time::OffsetDateTime = datetime!(2025-08-01 12:00 UTC);

    fn authority() -> TokenAuthority {
        TokenAuthority::from_pem(TEST_PRIVATE_KEY, TEST_PUBLIC_KEY).unwrap()
    }

    fn user(connection: &Connection) -> User {
        let hash =
            PasswordHash::new(ValidatedPassword::new_unchecked("averylongpassword"), 4).unwrap();

        create_user("alex", hash, NOW, connection).unwrap()
    }

    #[test]
    fn service_token_validates_until_revoked() {
        let connection = get_test_connection();
        let authority = authority();
        let user = user(&connection);
        let created = create_service_token(
            user.id,
            "grafana",
            Duration::days(30),
            &authority,
            NOW,
            &connection,
        )
        .unwrap();

        let claims = authority
            .validate_token(&created.token, NOW, &connection)
            .unwrap();
        assert_eq!(claims.user_id, user.id);

        revoke_service_token(
            created.service_token.id,
            user.id,
            &authority,
            NOW,
            &connection,
        )
        .unwrap();

        let result = authority.validate_token(&created.token, NOW, &connection);
        assert_eq!(
            result,
            Err(Error::Unauthenticated("token has been revoked".to_owned()))
        );
        assert_eq!(list_service_tokens(user.id, &connection), Ok(vec![]));
    }

    #[test]
    fn second_validation_is_served_from_cache_until_revoked() {
        let connection = get_test_connection();
        let authority = authority();
        let user = user(&connection);
        let created = create_service_token(
            user.id,
            "grafana",
            Duration::days(30),
            &authority,
            NOW,
            &connection,
        )
        .unwrap();

        authority
            .validate_token(&created.token, NOW, &connection)
            .unwrap();
        // Revoked behind the authority's back, so only a cache hit still accepts the token.
        connection
            .execute(
                "INSERT INTO jti_revocation (jti, revoked_at, expires_at) VALUES (?1, ?2, ?3)",
                (&created.service_token.jti, NOW, created.service_token.expires_at),
            )
            .unwrap();
        let second = authority.validate_token(&created.token, NOW + Duration::minutes(1), &connection);

        assert!(second.is_ok());
        assert_eq!(authority.cached_validations(), 1);

        revoke_service_token(
            created.service_token.id,
            user.id,
            &authority,
            NOW + Duration::minutes(2),
            &connection,
        )
        .unwrap();
        let third = authority.validate_token(&created.token, NOW + Duration::minutes(2), &connection);

        assert_eq!(
            third,
            Err(Error::Unauthenticated("token has been revoked".to_owned()))
        );
    }

    #[test]
    fn revocation_is_seen_by_a_cold_cache() {
        let connection = get_test_connection();
        let issuer = authority();
        let user = user(&connection);
        let created = create_service_token(
            user.id,
            "backup script",
            Duration::days(30),
            &issuer,
            NOW,
            &connection,
        )
        .unwrap();
        revoke_service_token(created.service_token.id, user.id, &issuer, NOW, &connection)
            .unwrap();

        let restarted = authority();
        let result = restarted.validate_token(&created.token, NOW, &connection);

        assert!(matches!(result, Err(Error::Unauthenticated(_))));
    }

    #[test]
    fn other_users_cannot_revoke() {
        let connection = get_test_connection();
        let authority = authority();
        let user = user(&connection);
        let created = create_service_token(
            user.id,
            "grafana",
            Duration::days(30),
            &authority,
            NOW,
            &connection,
        )
        .unwrap();

        let result = revoke_service_token(
            created.service_token.id,
            UserID::new(user.id.as_i64() + 1),
            &authority,
            NOW,
            &connection,
        );

        assert_eq!(result, Err(Error::NotFound));
        assert!(!is_revoked(&created.service_token.jti, &connection).unwrap());
    }

    #[test]
    fn create_rejects_empty_name() {
        let connection = get_test_connection();
        let user = user(&connection);

        let result = create_service_token(
            user.id,
            "  ",
            Duration::days(1),
            &authority(),
            NOW,
            &connection,
        );

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn expired_revocations_are_purged() {
        let connection = get_test_connection();
        let authority = authority();
        let user = user(&connection);
        let short = create_service_token(
            user.id,
            "short",
            Duration::days(1),
            &authority,
            NOW,
            &connection,
        )
        .unwrap();
        let long = create_service_token(
            user.id,
            "long",
            Duration::days(90),
            &authority,
            NOW,
            &connection,
        )
        .unwrap();
        revoke_service_token(short.service_token.id, user.id, &authority, NOW, &connection)
            .unwrap();
        revoke_service_token(long.service_token.id, user.id, &authority, NOW, &connection)
            .unwrap();

        let purged = purge_expired_revocations(NOW + Duration::days(2), &connection).unwrap();

        assert_eq!(purged, 0);
        assert!(is_revoked(&short.service_token.jti, &connection).unwrap());

        let purged = purge_expired_revocations(NOW + Duration::days(8), &connection).unwrap();

        assert_eq!(purged, 1);
        assert!(!is_revoked(&short.service_token.jti, &connection).unwrap());
        assert!(is_revoked(&long.service_token.jti, &connection).unwrap());
    }
}
