//! Signing and validating RS256 bearer tokens.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    Error,
    auth::{RevocationCache, UserID, is_revoked},
};

/// What a token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Issued at log-in, short lived and never revoked.
    Web,
    /// Issued for scripts and integrations, may be revoked.
    ServiceToken,
}

/// The claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// The unique ID of the token.
    pub jti: String,
    /// The user the token acts for.
    pub user_id: UserID,
    /// What the token was issued for.
    pub token_type: TokenType,
    /// When the token expires, in seconds since the Unix epoch.
    pub exp: i64,
}

/// A freshly signed token and its claims.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    /// The encoded token to hand to the client.
    pub token: String,
    /// What the token says.
    pub claims: Claims,
}

/// Holds the RSA key pair and the cache of revocation lookups.
pub struct TokenAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    revocations: RevocationCache,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("revocations", &self.revocations)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    /// Load a PKCS#1 PEM private key and the matching public key.
    ///
    /// # Errors
    /// Returns [Error::InvalidKey] if either key cannot be parsed.
    pub fn from_pem(private_key_pem: &str, public_key_pem: &str) -> Result<Self, Error> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|error| Error::InvalidKey(format!("private key: {error}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|error| Error::InvalidKey(format!("public key: {error}")))?;

        // Expiry is checked against the caller's clock in `validate_token`.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
            revocations: RevocationCache::default(),
        })
    }

    /// Sign a new token for `user_id` that expires `ttl` after `now`.
    ///
    /// # Errors
    /// Returns [Error::TokenCreation] if signing fails.
    pub fn generate_token(
        &self,
        user_id: UserID,
        token_type: TokenType,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<IssuedToken, Error> {
        let claims = Claims {
            jti: Uuid::new_v4().to_string(),
            user_id,
            token_type,
            exp: (now + ttl).unix_timestamp(),
        };

        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|error| Error::TokenCreation(error.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    /// Check the signature, expiry and revocation status of `token`.
    ///
    /// Revocation is only looked up in the database for service tokens, and the outcome of every
    /// check is cached by token ID.
    ///
    /// # Errors
    /// Returns [Error::Unauthenticated] if the token is malformed, badly signed, expired or
    /// revoked.
    pub fn validate_token(
        &self,
        token: &str,
        now: OffsetDateTime,
        connection: &Connection,
    ) -> Result<Claims, Error> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|error| Error::Unauthenticated(format!("invalid token: {error}")))?
            .claims;

        if claims.exp <= now.unix_timestamp() {
            return Err(Error::Unauthenticated("token has expired".to_owned()));
        }

        let revoked = match self.revocations.get(&claims.jti, now) {
            Some(revoked) => revoked,
            None => {
                let revoked = match claims.token_type {
                    TokenType::ServiceToken => is_revoked(&claims.jti, connection)?,
                    TokenType::Web => false,
                };
                self.revocations.put(&claims.jti, revoked, now);
                revoked
            }
        };

        if revoked {
            return Err(Error::Unauthenticated("token has been revoked".to_owned()));
        }

        Ok(claims)
    }

    /// Mark `jti` as revoked in the cache.
    pub fn remember_revocation(&self, jti: &str, now: OffsetDateTime) {
        self.revocations.put(jti, true, now);
    }

    /// The number of token IDs with a cached outcome.
    pub fn cached_validations(&self) -> usize {
        self.revocations.len()
    }
}

#[cfg(test)]
mod token_tests {
    use time::{Duration, macros::datetime};

    use crate::{
        Error,
        auth::UserID,
        test_utils::{OTHER_PRIVATE_KEY, TEST_PRIVATE_KEY, TEST_PUBLIC_KEY, get_test_connection},
    };

    use super::{TokenAuthority, TokenType};

    const NOW: time::OffsetDateTime = datetime!(2025-08-01 12:00 UTC);

    fn authority() -> TokenAuthority {
        TokenAuthority::from_pem(TEST_PRIVATE_KEY, TEST_PUBLIC_KEY).unwrap()
    }

    #[test]
    fn issued_token_validates() {
        let connection = get_test_connection();
        let authority = authority();
        let issued = authority
            .generate_token(UserID::new(7), TokenType::Web, Duration::hours(1), NOW)
            .unwrap();

        let claims = authority
            .validate_token(&issued.token, NOW + Duration::minutes(30), &connection)
            .unwrap();

        assert_eq!(claims, issued.claims);
        assert_eq!(claims.exp, (NOW + Duration::hours(1)).unix_timestamp());
    }

    #[test]
    fn expired_token_is_rejected() {
        let connection = get_test_connection();
        let authority = authority();
        let issued = authority
            .generate_token(UserID::new(7), TokenType::Web, Duration::hours(1), NOW)
            .unwrap();

        let result =
            authority.validate_token(&issued.token, NOW + Duration::hours(1), &connection);

        assert_eq!(
            result,
            Err(Error::Unauthenticated("token has expired".to_owned()))
        );
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let connection = get_test_connection();
        let forger = TokenAuthority::from_pem(OTHER_PRIVATE_KEY, TEST_PUBLIC_KEY).unwrap();
        let issued = forger
            .generate_token(UserID::new(7), TokenType::Web, Duration::hours(1), NOW)
            .unwrap();

        let result = authority().validate_token(&issued.token, NOW, &connection);

        assert!(matches!(result, Err(Error::Unauthenticated(_))));
    }

    #[test]
    fn garbage_is_rejected() {
        let connection = get_test_connection();

        let result = authority().validate_token("not.a.token", NOW, &connection);

        assert!(matches!(result, Err(Error::Unauthenticated(_))));
    }

    #[test]
    fn bad_key_is_reported() {
        let result = TokenAuthority::from_pem("nope", TEST_PUBLIC_KEY);

        assert!(matches!(result, Err(Error::InvalidKey(_))));
    }
}
