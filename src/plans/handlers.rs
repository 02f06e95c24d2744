use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreatePlanRequest, DeletePlanQuery, ListPlansQuery, UpdatePlanRequest},
    repo_types::{Plan, PlanKind, PlanSummary},
    services,
};
use crate::{
    auth::extractors::CurrentUser,
    error::AppResult,
    extract::{AppJson, AppPath, AppQuery},
    state::AppState,
};

/// Routes for one plan kind, mounted under `/{base}`.
pub fn plan_routes(kind: PlanKind, base: &str) -> Router<AppState> {
    Router::new()
        .route(&format!("/{base}"), get(list_plans).post(create_plan))
        .route(
            &format!("/{base}/:id"),
            get(get_plan)
                .put(update_plan)
                .patch(update_plan)
                .delete(delete_plan),
        )
        .layer(Extension(kind))
}

#[instrument(skip(state, user, payload))]
pub async fn create_plan(
    State(state): State<AppState>,
    Extension(kind): Extension<PlanKind>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<CreatePlanRequest>,
) -> AppResult<(StatusCode, Json<Plan>)> {
    let plan = services::create_plan(&state, &user, kind, payload).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

#[instrument(skip(state, user))]
pub async fn list_plans(
    State(state): State<AppState>,
    Extension(kind): Extension<PlanKind>,
    CurrentUser(user): CurrentUser,
    AppQuery(q): AppQuery<ListPlansQuery>,
) -> AppResult<Json<Vec<PlanSummary>>> {
    Ok(Json(services::list_plans(&state, &user, kind, q.client).await?))
}

#[instrument(skip(state, user))]
pub async fn get_plan(
    State(state): State<AppState>,
    Extension(kind): Extension<PlanKind>,
    CurrentUser(user): CurrentUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Plan>> {
    Ok(Json(services::get_plan(&state, &user, kind, id).await?))
}

#[instrument(skip(state, user, payload))]
pub async fn update_plan(
    State(state): State<AppState>,
    Extension(kind): Extension<PlanKind>,
    CurrentUser(user): CurrentUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<UpdatePlanRequest>,
) -> AppResult<Json<Plan>> {
    Ok(Json(
        services::update_plan(&state, &user, kind, id, payload).await?,
    ))
}

#[instrument(skip(state, user))]
pub async fn delete_plan(
    State(state): State<AppState>,
    Extension(kind): Extension<PlanKind>,
    CurrentUser(user): CurrentUser,
    AppPath(id): AppPath<Uuid>,
    AppQuery(q): AppQuery<DeletePlanQuery>,
) -> AppResult<StatusCode> {
    services::soft_delete_plan(&state, &user, kind, id, q.party).await?;
    Ok(StatusCode::NO_CONTENT)
}
