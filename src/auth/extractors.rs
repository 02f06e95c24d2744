use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::{jwt::AuthUser, repo_types::User};
use crate::{error::AppError, state::AppState};

/// The authenticated, active identity behind the request.
///
/// The role is read from the store on every request, so a role or activation
/// change takes effect without reissuing tokens.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;

        let user = state
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("User not found".into()))?;

        if !user.is_active {
            warn!(%user_id, "token for deactivated user");
            return Err(AppError::Unauthorized("User is deactivated".into()));
        }

        Ok(CurrentUser(user))
    }
}
