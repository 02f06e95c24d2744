//! Request extractors whose rejections render as `AppError` bodies instead of
//! the framework's plain-text responses.

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{AppError, FieldError};

/// JSON body. A field of the wrong type is reported under its JSON path.
pub struct AppJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(AppJson(value))
    }
}

pub struct AppQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(AppQuery(value))
    }
}

/// Path parameters. An id that does not parse cannot name anything, so it
/// reads as `NotFound`.
pub struct AppPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(AppPath(value))
    }
}

/// Strip the fixed rejection preamble and keep the deserializer's message.
fn detail(body_text: &str) -> &str {
    body_text
        .split_once(": ")
        .map_or(body_text, |(_, rest)| rest)
}

/// `diet[0].weekday: invalid type ...` names the field before the first colon.
/// Root-level messages carry no path and land on `body`.
fn path_error(detail: &str) -> FieldError {
    match detail.split_once(": ") {
        Some((path, reason)) if !path.contains(char::is_whitespace) => {
            FieldError::new(path, reason)
        }
        _ => FieldError::new("body", detail),
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        debug!(status = %rejection.status(), detail = %text, "json body rejected");
        match rejection {
            JsonRejection::JsonDataError(_) => AppError::Validation(vec![path_error(detail(&text))]),
            _ => AppError::field("body", detail(&text)),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        let text = rejection.body_text();
        debug!(detail = %text, "query string rejected");
        AppError::field("query", detail(&text))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(e) => {
                debug!(detail = %e.body_text(), "path rejected");
                AppError::NotFound
            }
            other => AppError::Internal(anyhow::anyhow!(other.body_text())),
        }
    }
}
