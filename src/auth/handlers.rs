use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, LoginRequest, PublicUser, RefreshRequest, RegisterRequest,
            SetPasswordRequest,
        },
        extractors::CurrentUser,
        jwt::JwtKeys,
        services,
    },
    error::AppResult,
    extract::AppJson,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_me).delete(deactivate_me))
        .route("/me/set_password", post(set_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let user = services::register(state.store.as_ref(), payload).await?;
    let keys = JwtKeys::from_ref(&state);
    Ok((StatusCode::CREATED, Json(services::issue_tokens(&keys, user)?)))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let user =
        services::authenticate(state.store.as_ref(), &payload.email, &payload.password).await?;
    let keys = JwtKeys::from_ref(&state);
    Ok(Json(services::issue_tokens(&keys, user)?))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let keys = JwtKeys::from_ref(&state);
    let resp = services::refresh(state.store.as_ref(), &keys, &payload.refresh_token).await?;
    Ok(Json(resp))
}

#[instrument(skip_all)]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(user))
}

#[instrument(skip_all)]
pub async fn deactivate_me(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<StatusCode> {
    services::deactivate(state.store.as_ref(), &user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all)]
pub async fn set_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<SetPasswordRequest>,
) -> AppResult<StatusCode> {
    services::set_password(state.store.as_ref(), &user, payload).await?;
    Ok(StatusCode::NO_CONTENT)
}
