use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::{error, warn};

use crate::{error::ApiError, state::AppState, users::User};

/// Resolves the `Authorization: Token <key>` header to the caller's user record.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ApiError::Unauthorized(
                "Authentication credentials were not provided.",
            ))?;

        let key = token_key(auth).ok_or(ApiError::Unauthorized("Invalid token header."))?;

        let user = match resolve(state, key).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!("unknown token");
                return Err(ApiError::Unauthorized("Invalid token."));
            }
            Err(e) => {
                error!(error = %e, "token lookup failed");
                return Err(ApiError::Internal(e));
            }
        };

        if !user.is_active {
            warn!(user_id = %user.id, "inactive user presented token");
            return Err(ApiError::Unauthorized("User inactive or deleted."));
        }

        Ok(AuthUser(user))
    }
}

async fn resolve(state: &AppState, key: &str) -> anyhow::Result<Option<User>> {
    match state.tokens.find_user_id(key).await? {
        Some(user_id) => state.users.find_by_id(user_id).await,
        None => Ok(None),
    }
}

/// Key from a `Token <key>` or `Bearer <key>` header; the scheme is case-insensitive.
fn token_key(header: &str) -> Option<&str> {
    let (scheme, key) = header.trim().split_once(' ')?;
    let key = key.trim();
    let known = scheme.eq_ignore_ascii_case("Token") || scheme.eq_ignore_ascii_case("Bearer");
    (known && !key.is_empty() && !key.contains(' ')).then_some(key)
}
