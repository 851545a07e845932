//! JSON handlers for users and tokens.

use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use time::Duration;

use crate::{
    AppState, Error,
    auth::{
        AuthContext, CreatedServiceToken, LogInResponse, PasswordHash, ServiceToken,
        ServiceTokenId, User, create_service_token, list_service_tokens, log_in, register_user,
        revoke_service_token,
    },
    clock::now_utc,
};

/// The request body for registering a user.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    /// The name to log in with.
    pub login: String,
    /// The raw password.
    pub password: String,
}

/// The request body for logging in.
#[derive(Debug, Deserialize)]
pub struct LogInRequest {
    /// The name to log in with.
    pub login: String,
    /// The raw password.
    pub password: String,
}

/// The request body for issuing a service token.
#[derive(Debug, Deserialize)]
pub struct CreateServiceTokenRequest {
    /// A label for the token.
    pub name: String,
    /// How many days the token is valid for.
    #[serde(default = "default_service_token_days")]
    pub ttl_days: i64,
}

fn default_service_token_days() -> i64 {
    365
}

/// The request body for revoking a service token.
#[derive(Debug, Deserialize)]
pub struct RevokeServiceTokenRequest {
    /// The service token to revoke.
    pub id: ServiceTokenId,
}

/// Register a new user. Anonymous requests are allowed.
pub async fn create_user_endpoint(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<User>, Error> {
    let connection = state.db.write()?;

    register_user(
        &request.login,
        &request.password,
        PasswordHash::DEFAULT_COST,
        now_utc(),
        &connection,
    )
    .map(Json)
}

/// Exchange a login and password for a web token.
pub async fn log_in_endpoint(
    State(state): State<AppState>,
    Json(request): Json<LogInRequest>,
) -> Result<Json<LogInResponse>, Error> {
    let connection = state.db.read()?;

    log_in(
        &request.login,
        &request.password,
        &state.tokens,
        state.config.web_token_ttl,
        now_utc(),
        &connection,
    )
    .map(Json)
}

/// Issue a service token for the calling user.
pub async fn create_service_token_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateServiceTokenRequest>,
) -> Result<Json<CreatedServiceToken>, Error> {
    let user_id = auth.require_user()?;
    let connection = state.db.write()?;

    create_service_token(
        user_id,
        &request.name,
        Duration::days(request.ttl_days),
        &state.tokens,
        now_utc(),
        &connection,
    )
    .map(Json)
}

/// List the calling user's service tokens.
pub async fn list_service_tokens_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ServiceToken>>, Error> {
    let user_id = auth.require_user()?;
    let connection = state.db.read()?;

    list_service_tokens(user_id, &connection).map(Json)
}

/// Revoke one of the calling user's service tokens.
pub async fn revoke_service_token_endpoint(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<RevokeServiceTokenRequest>,
) -> Result<Json<()>, Error> {
    let user_id = auth.require_user()?;
    let connection = state.db.write()?;

    revoke_service_token(request.id, user_id, &state.tokens, now_utc(), &connection).map(Json)
}
