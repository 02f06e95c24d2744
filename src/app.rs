use std::net::SocketAddr;
use axum::{Router, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::state::AppState;
use crate::{auth, clients, plans};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1",
              Router::new()
                  .merge(auth::router())
                  .merge(clients::router())
                  .merge(plans::router())
                  .route("/health", get(|| async { "ok" }))
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
        .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        extract::FromRef,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::jwt::JwtKeys;

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(app: &Router, email: &str, role: &str) -> (String, Uuid) {
        let (status, body) = call(
            app,
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "email": email, "password": "password123", "role": role })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let token = body["access_token"].as_str().unwrap().to_string();
        let id = body["user"]["id"].as_str().unwrap().parse().unwrap();
        (token, id)
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn specialist_flow_over_http() {
        let app = build_app(AppState::fake());
        let (spec_token, _) = register(&app, "coach@x.com", "specialist").await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/clients",
            Some(&spec_token),
            Some(json!({
                "client": { "email": "c@x.com", "first_name": "Cat", "last_name": "Stevens" },
                "notes": "n"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["client_created"], json!(true));
        let client_id = body["client"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, Method::GET, "/api/v1/clients", Some(&spec_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["client"]["email"], json!("c@x.com"));

        let (status, plan) = call(
            &app,
            Method::POST,
            "/api/v1/diet-plans",
            Some(&spec_token),
            Some(json!({
                "client": client_id,
                "name": "Cut",
                "kkal": 1800,
                "diet": [{ "weekday": "1", "spec_comment": "a", "user_comment": "b" }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{plan}");
        assert_eq!(plan["kkal"], json!(1800));
        assert_eq!(plan["entries"][0]["weekday"], json!("1"));
        let plan_id = plan["id"].as_str().unwrap().to_string();

        let (status, plan) = call(
            &app,
            Method::PUT,
            &format!("/api/v1/diet-plans/{plan_id}"),
            Some(&spec_token),
            Some(json!({ "entries": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(plan["entries"], json!([]));

        let (status, list) = call(
            &app,
            Method::GET,
            &format!("/api/v1/diet-plans?user={client_id}"),
            Some(&spec_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/api/v1/diet-plans/{plan_id}"),
            Some(&spec_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(
            &app,
            Method::GET,
            &format!("/api/v1/diet-plans/{plan_id}"),
            Some(&spec_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn error_shapes_are_distinct() {
        let app = build_app(AppState::fake());
        let (token, _) = register(&app, "coach@x.com", "specialist").await;

        let (status, body) =
            call(&app, Method::GET, "/api/v1/training-plans", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["param"], json!("client"));

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/training-plans/{}", Uuid::new_v4()),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "not found" }));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/training-plans",
            Some(&token),
            Some(json!({ "client": Uuid::new_v4() })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({ "error": "forbidden" }));

        let (status, _) = call(&app, Method::GET, "/api/v1/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    async fn add_client(app: &Router, token: &str, email: &str) -> (StatusCode, Value) {
        call(
            app,
            Method::POST,
            "/api/v1/clients",
            Some(token),
            Some(json!({
                "client": { "email": email, "first_name": "Cat", "last_name": "Stevens" }
            })),
        )
        .await
    }

    #[tokio::test]
    async fn malformed_input_gets_field_errors() {
        let app = build_app(AppState::fake());
        let (token, _) = register(&app, "coach@x.com", "specialist").await;
        let (_, body) = add_client(&app, &token, "c@x.com").await;
        let client_id = body["client"]["id"].as_str().unwrap().to_string();

        let (status, plan) = call(
            &app,
            Method::POST,
            "/api/v1/diet-plans",
            Some(&token),
            Some(json!({ "client": client_id, "diet": [{ "weekday": 1 }] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{plan}");
        assert_eq!(plan["entries"][0]["weekday"], json!("1"));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/diet-plans",
            Some(&token),
            Some(json!({ "client": client_id, "kkal": 20_000_000_000i64 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("validation failed"));
        assert_eq!(body["fields"][0]["field"], json!("kkal"));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/diet-plans",
            Some(&token),
            Some(json!({ "client": client_id, "diet": [{ "weekday": true }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"][0]["field"], json!("diet[0].weekday"));

        let (status, body) =
            call(&app, Method::POST, "/api/v1/clients", Some(&token), Some(json!(5))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"][0]["field"], json!("body"));

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/v1/diet-plans?client=not-a-uuid",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"][0]["field"], json!("query"));

        let (status, body) =
            call(&app, Method::GET, "/api/v1/diet-plans/not-a-uuid", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "not found" }));
    }

    #[tokio::test]
    async fn created_client_logs_in_and_sets_own_password() {
        let app = build_app(AppState::fake());
        let (token, _) = register(&app, "coach@x.com", "specialist").await;
        let (status, body) = add_client(&app, &token, "c@x.com").await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let temporary = body["temporary_password"].as_str().unwrap().to_string();

        let login = |password: String| {
            let app = app.clone();
            async move {
                call(
                    &app,
                    Method::POST,
                    "/api/v1/auth/login",
                    None,
                    Some(json!({ "email": "c@x.com", "password": password })),
                )
                .await
            }
        };

        let (status, body) = login(temporary.clone()).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        let client_token = body["access_token"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/me/set_password",
            Some(&client_token),
            Some(json!({ "current_password": &temporary, "new_password": "client-chosen-pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        assert_eq!(login(temporary).await.0, StatusCode::UNAUTHORIZED);
        assert_eq!(login("client-chosen-pw".into()).await.0, StatusCode::OK);

        // linking an existing identity reveals no password
        let (other, _) = register(&app, "coach2@x.com", "specialist").await;
        let (status, body) = add_client(&app, &other, "c@x.com").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["client_created"], json!(false));
        assert!(body.get("temporary_password").is_none());
    }

    #[tokio::test]
    async fn deactivated_token_is_rejected() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let (token, id) = register(&app, "gone@x.com", "client").await;

        let (status, body) = call(&app, Method::GET, "/api/v1/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], json!("client"));

        let (status, _) = call(&app, Method::DELETE, "/api/v1/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = call(&app, Method::GET, "/api/v1/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // a fresh token for the same identity is refused too
        let fresh = JwtKeys::from_ref(&state).sign_access(id).unwrap();
        let (status, _) = call(&app, Method::GET, "/api/v1/me", Some(&fresh), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
