use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            ChangePasswordRequest, PasswordRecoveryRequest, Profile, ProfileUpdate,
            RegisterRequest, TokenRequest, TokenResponse,
        },
        extractors::AuthUser,
        services,
    },
    error::ApiResult,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/create/", post(create_user))
        .route("/token/", post(create_token))
        .route("/password_recovery/", post(password_recovery))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me/", get(get_me).patch(update_me).put(update_me))
        .route("/change_password/", patch(change_password).put(change_password))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Profile>)> {
    let Json(payload) = payload?;
    let user =
        services::register(state.users.as_ref(), state.config.min_password_length, payload).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn create_token(
    State(state): State<AppState>,
    payload: Result<Json<TokenRequest>, JsonRejection>,
) -> ApiResult<Json<TokenResponse>> {
    let Json(payload) = payload?;
    let token =
        services::issue_token(state.users.as_ref(), state.tokens.as_ref(), payload).await?;
    Ok(Json(TokenResponse { token }))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<Profile> {
    Json(user.into())
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> ApiResult<Json<Profile>> {
    let Json(payload) = payload?;
    let updated = services::update_profile(
        state.users.as_ref(),
        state.config.min_password_length,
        &user,
        payload,
    )
    .await?;
    Ok(Json(updated.into()))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> ApiResult<Json<&'static str>> {
    let Json(payload) = payload?;
    services::change_password(state.users.as_ref(), &user, payload).await?;
    Ok(Json("Success."))
}

/// Always 204 on valid input, whether or not the address is registered.
#[instrument(skip(state, payload))]
pub async fn password_recovery(
    State(state): State<AppState>,
    payload: Result<Json<PasswordRecoveryRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(payload) = payload?;
    services::recover_password(
        state.users.as_ref(),
        state.mailer.as_ref(),
        &state.config.app_name,
        &state.config.smtp.from_email,
        payload,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}
