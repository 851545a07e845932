//! Bearer token authentication for the JSON API.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::{
    AppState, Error,
    auth::{TokenType, UserID},
    clock::now_utc,
};

/// Who is making a request.
///
/// Handlers receive it with `Extension(auth): Extension<AuthContext>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthContext {
    /// The authenticated user, [UserID::ANONYMOUS] when no token was sent.
    pub user_id: UserID,
    /// The kind of token the request was authenticated with.
    pub token_type: Option<TokenType>,
}

impl AuthContext {
    /// The context of a request without a token.
    pub fn anonymous() -> Self {
        Self {
            user_id: UserID::ANONYMOUS,
            token_type: None,
        }
    }

    /// The context of a request authenticated as `user_id`.
    pub fn user(user_id: UserID, token_type: TokenType) -> Self {
        Self {
            user_id,
            token_type: Some(token_type),
        }
    }

    /// The authenticated user.
    ///
    /// # Errors
    /// Returns [Error::PermissionDenied] for anonymous requests.
    pub fn require_user(&self) -> Result<UserID, Error> {
        if self.user_id == UserID::ANONYMOUS {
            Err(Error::PermissionDenied)
        } else {
            Ok(self.user_id)
        }
    }
}

/// Middleware that resolves the optional `Authorization: Bearer` header into an [AuthContext].
///
/// Requests without the header run anonymously. A header that is malformed or carries an invalid
/// token is rejected with 401.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = match authenticate(&state, &request) {
        Ok(context) => context,
        Err(error) => {
            tracing::debug!("Rejected request to {}: {error}", request.uri().path());
            return error.into_response();
        }
    };

    request.extensions_mut().insert(context);

    next.run(request).await
}

fn authenticate(state: &AppState, request: &Request) -> Result<AuthContext, Error> {
    let headers = request.headers();

    if !headers.contains_key(AUTHORIZATION) {
        return Ok(AuthContext::anonymous());
    }

    let bearer = headers
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| Error::Unauthenticated("expected a bearer token".to_owned()))?;

    let connection = state.db.read()?;
    let claims = state
        .tokens
        .validate_token(bearer.token(), now_utc(), &connection)?;

    Ok(AuthContext::user(claims.user_id, claims.token_type))
}
