//! Users, passwords and bearer tokens.
//!
//! Tokens are RS256 JWTs. Web tokens are issued at log-in and simply expire, service tokens are
//! stored so that they can be listed and revoked.

mod cache;
mod endpoints;
mod middleware;
mod password;
mod service_token;
mod token;
mod user;

pub use cache::{CACHE_CAPACITY, CACHE_TTL, RevocationCache};
pub use endpoints::{
    create_service_token_endpoint, create_user_endpoint, list_service_tokens_endpoint,
    log_in_endpoint, revoke_service_token_endpoint,
};
pub use middleware::{AuthContext, auth_middleware};
pub use password::{PasswordHash, ValidatedPassword};
pub use service_token::{
    CreatedServiceToken, ServiceToken, ServiceTokenId, create_service_token,
    create_service_token_table, is_revoked, list_service_tokens, purge_expired_revocations,
    revoke_service_token,
};
pub use token::{Claims, IssuedToken, TokenAuthority, TokenType};
pub use user::{
    LogInResponse, User, UserID, create_user, create_user_table, get_user_by_id,
    get_user_by_login, log_in, register_user,
};
