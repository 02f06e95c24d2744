use crate::state::AppState;
use axum::Router;

use self::repo_types::PlanKind;

pub mod dto;
pub mod handlers;
pub mod repo_types;
pub mod services;
pub mod sync;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::plan_routes(PlanKind::Training, "training-plans"))
        .merge(handlers::plan_routes(PlanKind::Diet, "diet-plans"))
}
