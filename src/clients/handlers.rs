use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{ClientCard, CreateClientRequest, CreatedClient, ListClientsQuery, UpdateClientRequest},
    services,
};
use crate::{
    auth::extractors::CurrentUser,
    error::AppResult,
    extract::{AppJson, AppPath, AppQuery},
    state::AppState,
};

pub fn client_routes() -> Router<AppState> {
    Router::new()
        .route("/clients", get(list_clients).post(create_client))
        .route("/clients/:id", get(get_client).patch(update_client))
}

#[instrument(skip(state, user, payload))]
pub async fn create_client(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<CreateClientRequest>,
) -> AppResult<(StatusCode, Json<CreatedClient>)> {
    let created = services::create_client(&state, &user, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, user))]
pub async fn list_clients(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppQuery(q): AppQuery<ListClientsQuery>,
) -> AppResult<Json<Vec<ClientCard>>> {
    Ok(Json(services::list_clients(&state, &user, q.specialist).await?))
}

#[instrument(skip(state, user))]
pub async fn get_client(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<ClientCard>> {
    Ok(Json(services::get_client(&state, &user, id).await?))
}

#[instrument(skip(state, user, payload))]
pub async fn update_client(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdateClientRequest>,
) -> AppResult<Json<ClientCard>> {
    Ok(Json(services::update_client(&state, &user, id, payload).await?))
}
