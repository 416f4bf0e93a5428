use std::net::SocketAddr;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    auth, config::AppConfig, error::AppError, response::ApiResponse, state::AppState, tasks,
};

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();
    // cookies need credentials, which rules out wildcards
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn not_found() -> AppError {
    AppError::NotFound("Not found".into())
}

/// Routing answers 405 with an empty body; give it the envelope, keep `Allow`.
async fn method_not_allowed(res: Response) -> Response {
    if res.status() != StatusCode::METHOD_NOT_ALLOWED {
        return res;
    }
    let allow = res.headers().get(header::ALLOW).cloned();
    let mut out = (
        StatusCode::METHOD_NOT_ALLOWED,
        ApiResponse::failure("Method not allowed"),
    )
        .into_response();
    if let Some(allow) = allow {
        out.headers_mut().insert(header::ALLOW, allow);
    }
    out
}

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(tasks::router())
                .route("/health", get(|| async { "ok" })),
        )
        .fallback(not_found)
        .with_state(state)
        .layer(middleware::map_response(method_not_allowed))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthMode;
    use axum::{
        body::Body,
        http::{HeaderMap, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    fn app(mode: AuthMode) -> Router {
        build_app(AppState::in_memory(AppConfig::for_tests(mode)))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            req = req.header(header::AUTHORIZATION, format!("Bearer {auth}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        send_raw(app, req).await
    }

    async fn send_raw(app: &Router, req: Request<Body>) -> Reply {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply { status, headers, body }
    }

    async fn signup(app: &Router, email: &str) -> (String, String) {
        let r = send(
            app,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({"email": email, "password": "secret1", "name": "Ann"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::CREATED, "{}", r.body);
        (
            r.body["data"]["token"].as_str().unwrap().to_string(),
            r.body["data"]["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(AppState::fake());
        let res = app
            .clone()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unrouted_requests_still_get_the_envelope() {
        let app = app(AuthMode::Token);

        for uri in ["/api/nope", "/nope", "/api/tasks/1/extra"] {
            let r = send(&app, "GET", uri, None, None).await;
            assert_eq!(r.status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(r.body, json!({"success": false, "error": "Not found"}));
        }

        let r = send(&app, "PATCH", "/api/tasks", None, None).await;
        assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(r.body, json!({"success": false, "error": "Method not allowed"}));
        let allow = r.headers.get(header::ALLOW).unwrap().to_str().unwrap();
        assert!(allow.contains("GET") && allow.contains("POST"));
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let app = app(AuthMode::Token);

        let r = send(
            &app,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({"email": "a@x.com", "password": "secret1", "name": "Ann"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::CREATED);
        assert_eq!(r.body["success"], true);
        assert_eq!(r.body["data"]["user"]["email"], "a@x.com");
        assert!(r.body["data"]["user"].get("password").is_none());
        assert!(r.body["data"]["user"].get("passwordHash").is_none());
        let token = r.body["data"]["token"].as_str().unwrap().to_string();

        let r = send(
            &app,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({"email": "A@x.com", "password": "other2", "name": "Bob"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(r.body, json!({"success": false, "error": "Email already exists"}));

        let r = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "a@x.com", "password": "wrong"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::UNAUTHORIZED);
        assert_eq!(r.body["error"], "Invalid email or password");

        let r = send(&app, "POST", "/api/tasks", Some(&token), Some(json!({"title": ""}))).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(r.body["error"], "Title is required");

        let r = send(
            &app,
            "POST",
            "/api/tasks",
            Some(&token),
            Some(json!({"title": "Buy milk", "priority": "low"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::CREATED);
        assert_eq!(r.body["data"]["status"], "pending");
        assert_eq!(r.body["data"]["priority"], "low");
        let id = r.body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(
            r.headers.get(header::LOCATION).unwrap(),
            &format!("/api/tasks/{id}")
        );

        let r = send(&app, "GET", "/api/tasks", Some(&token), None).await;
        assert_eq!(r.body["data"].as_array().unwrap().len(), 1);

        let r = send(&app, "DELETE", &format!("/api/tasks/{id}"), Some(&token), None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["message"], "Task deleted successfully");

        let r = send(&app, "GET", "/api/tasks", Some(&token), None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"], json!([]));
    }

    #[tokio::test]
    async fn login_failures_look_identical_over_http() {
        let app = app(AuthMode::Token);
        signup(&app, "a@x.com").await;

        let wrong = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "a@x.com", "password": "nope99"})),
        )
        .await;
        let unknown = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ghost@x.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(wrong.status, unknown.status);
        assert_eq!(wrong.body, unknown.body);

        let ok = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "A@X.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(ok.status, StatusCode::OK);
        assert!(ok.body["data"]["token"].is_string());
    }

    #[tokio::test]
    async fn signup_validation_errors_use_envelope() {
        let app = app(AuthMode::Token);
        let r = send(&app, "POST", "/api/auth/signup", None, Some(json!({"email": "a@x.com"}))).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(r.body["success"], false);
        assert!(r.body["error"].as_str().unwrap().contains("required"));

        let req = Request::post("/api/auth/signup")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let r = send_raw(&app, req).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(r.body["success"], false);
    }

    #[tokio::test]
    async fn protected_routes_require_a_valid_proof() {
        let app = app(AuthMode::Token);
        let id = uuid::Uuid::new_v4();
        for (method, uri) in [
            ("GET", "/api/auth/profile".to_string()),
            ("GET", "/api/tasks".to_string()),
            ("POST", "/api/tasks".to_string()),
            ("GET", format!("/api/tasks/{id}")),
            ("PUT", format!("/api/tasks/{id}")),
            ("DELETE", format!("/api/tasks/{id}")),
        ] {
            for auth in [None, Some("not-a-token")] {
                let r = send(&app, method, &uri, auth, Some(json!({"title": "x"}))).await;
                assert_eq!(r.status, StatusCode::UNAUTHORIZED, "{method} {uri}");
                assert_eq!(r.body, json!({"success": false, "error": "Not authenticated"}));
            }
        }
    }

    #[tokio::test]
    async fn profile_returns_public_user() {
        let app = app(AuthMode::Token);
        let (token, user_id) = signup(&app, "a@x.com").await;
        let r = send(&app, "GET", "/api/auth/profile", Some(&token), None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["id"], user_id.as_str());
        assert_eq!(r.body["data"]["name"], "Ann");
        assert!(r.body["data"].get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn token_logout_is_stateless() {
        let app = app(AuthMode::Token);
        let (token, _) = signup(&app, "a@x.com").await;
        let r = send(&app, "POST", "/api/auth/logout", Some(&token), None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["message"], "Logged out successfully");
        assert!(r.headers.get(header::SET_COOKIE).is_none());

        // the token keeps working until it expires
        let r = send(&app, "GET", "/api/auth/profile", Some(&token), None).await;
        assert_eq!(r.status, StatusCode::OK);

        // logout without any proof still succeeds
        let r = send(&app, "POST", "/api/auth/logout", None, None).await;
        assert_eq!(r.status, StatusCode::OK);
    }

    /// get/update/delete × {owner, other user, bogus id}, over HTTP.
    #[tokio::test]
    async fn ownership_matrix_over_http() {
        let app = app(AuthMode::Token);
        let (ann, _) = signup(&app, "ann@x.com").await;
        let (bob, _) = signup(&app, "bob@x.com").await;

        let r = send(&app, "POST", "/api/tasks", Some(&ann), Some(json!({"title": "Ann's plan"}))).await;
        let id = r.body["data"]["id"].as_str().unwrap().to_string();
        let missing = uuid::Uuid::new_v4().to_string();

        let cases = [
            ("GET", None),
            ("PUT", Some(json!({"title": "hijacked"}))),
            ("DELETE", None),
        ];
        for (method, body) in cases.iter() {
            let r = send(&app, method, &format!("/api/tasks/{id}"), Some(&bob), body.clone()).await;
            assert_eq!(r.status, StatusCode::FORBIDDEN, "{method}");
            assert_eq!(r.body, json!({"success": false, "error": "Not authorized"}));
            assert!(!r.body.to_string().contains("Ann's plan"));

            for target in [missing.as_str(), "not-a-uuid"] {
                for caller in [&ann, &bob] {
                    let r = send(&app, method, &format!("/api/tasks/{target}"), Some(caller), body.clone()).await;
                    assert_eq!(r.status, StatusCode::NOT_FOUND, "{method} {target}");
                    assert_eq!(r.body["error"], "Task not found");
                }
            }
        }

        let r = send(&app, "GET", "/api/tasks", Some(&bob), None).await;
        assert_eq!(r.body["data"], json!([]));

        let r = send(&app, "GET", &format!("/api/tasks/{id}"), Some(&ann), None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["title"], "Ann's plan");

        let r = send(
            &app,
            "PUT",
            &format!("/api/tasks/{id}"),
            Some(&ann),
            Some(json!({"status": "completed", "dueDate": "2030-04-01"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["status"], "completed");
        assert_eq!(r.body["data"]["dueDate"], "2030-04-01T00:00:00Z");
        assert_eq!(r.body["data"]["title"], "Ann's plan");

        let r = send(&app, "DELETE", &format!("/api/tasks/{id}"), Some(&ann), None).await;
        assert_eq!(r.status, StatusCode::OK);
        let r = send(&app, "GET", &format!("/api/tasks/{id}"), Some(&ann), None).await;
        assert_eq!(r.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let app = app(AuthMode::Token);
        let (token, _) = signup(&app, "a@x.com").await;
        let mut ids = Vec::new();
        for title in ["one", "two", "three"] {
            let r = send(&app, "POST", "/api/tasks", Some(&token), Some(json!({"title": title}))).await;
            ids.push(r.body["data"]["id"].as_str().unwrap().to_string());
        }
        send(&app, "PUT", &format!("/api/tasks/{}", ids[0]), Some(&token), Some(json!({"status": "completed"}))).await;
        send(&app, "PUT", &format!("/api/tasks/{}", ids[1]), Some(&token), Some(json!({"status": "deleted"}))).await;

        let titles = |v: &Value| -> Vec<String> {
            v["data"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["title"].as_str().unwrap().to_string())
                .collect()
        };

        let all = send(&app, "GET", "/api/tasks", Some(&token), None).await;
        assert_eq!(titles(&all.body), vec!["three", "one"]);
        let pending = send(&app, "GET", "/api/tasks?status=pending", Some(&token), None).await;
        assert_eq!(titles(&pending.body), vec!["three"]);
        let completed = send(&app, "GET", "/api/tasks?status=completed", Some(&token), None).await;
        assert_eq!(titles(&completed.body), vec!["one"]);
        let deleted = send(&app, "GET", "/api/tasks?status=deleted", Some(&token), None).await;
        assert_eq!(titles(&deleted.body), vec!["two"]);
        let everything = send(&app, "GET", "/api/tasks?status=all", Some(&token), None).await;
        assert_eq!(titles(&everything.body), vec!["three", "one"]);

        let bad = send(&app, "GET", "/api/tasks?status=archived", Some(&token), None).await;
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert!(bad.body["error"].as_str().unwrap().starts_with("Status must be one of"));
    }

    #[tokio::test]
    async fn malformed_update_checks_ownership_first() {
        let app = app(AuthMode::Token);
        let (ann, _) = signup(&app, "ann@x.com").await;
        let (bob, _) = signup(&app, "bob@x.com").await;
        let r = send(&app, "POST", "/api/tasks", Some(&ann), Some(json!({"title": "Mine"}))).await;
        let id = r.body["data"]["id"].as_str().unwrap().to_string();

        let put = |target: String, token: String| {
            let app = app.clone();
            async move {
                let req = Request::put(format!("/api/tasks/{target}"))
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{oops"))
                    .unwrap();
                send_raw(&app, req).await
            }
        };

        let r = put(id.clone(), bob.clone()).await;
        assert_eq!(r.status, StatusCode::FORBIDDEN);
        let r = put(uuid::Uuid::new_v4().to_string(), bob).await;
        assert_eq!(r.status, StatusCode::NOT_FOUND);
        let r = put(id, ann).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(r.body["success"], false);
    }

    #[tokio::test]
    async fn update_rejects_empty_title() {
        let app = app(AuthMode::Token);
        let (token, _) = signup(&app, "a@x.com").await;
        let r = send(&app, "POST", "/api/tasks", Some(&token), Some(json!({"title": "Keep me"}))).await;
        let id = r.body["data"]["id"].as_str().unwrap().to_string();

        let r = send(&app, "PUT", &format!("/api/tasks/{id}"), Some(&token), Some(json!({"title": "  "}))).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(r.body["error"], "Title is required");

        let r = send(&app, "GET", &format!("/api/tasks/{id}"), Some(&token), None).await;
        assert_eq!(r.body["data"]["title"], "Keep me");
    }

    fn session_cookie(headers: &HeaderMap) -> String {
        let raw = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(raw.contains("HttpOnly"));
        assert!(raw.contains("Secure"));
        assert!(raw.contains("SameSite=Lax"));
        raw.split(';').next().unwrap().to_string()
    }

    async fn send_with_cookie(app: &Router, method: &str, uri: &str, cookie: &str, body: Option<Value>) -> Reply {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        send_raw(app, req).await
    }

    #[tokio::test]
    async fn session_mode_roundtrip() {
        let app = app(AuthMode::Session);

        let r = send(
            &app,
            "POST",
            "/api/auth/signup",
            None,
            Some(json!({"email": "a@x.com", "password": "secret1", "name": "Ann"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::CREATED);
        assert!(r.body["data"].get("token").is_none());
        let cookie = session_cookie(&r.headers);
        assert!(cookie.starts_with("taskdesk.sid="));

        let r = send_with_cookie(&app, "GET", "/api/auth/profile", &cookie, None).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.body["data"]["email"], "a@x.com");

        let r = send_with_cookie(&app, "POST", "/api/tasks", &cookie, Some(json!({"title": "Cookie task"}))).await;
        assert_eq!(r.status, StatusCode::CREATED);

        // bearer tokens mean nothing in session mode
        let r = send(&app, "GET", "/api/tasks", Some("whatever"), None).await;
        assert_eq!(r.status, StatusCode::UNAUTHORIZED);

        let r = send_with_cookie(&app, "POST", "/api/auth/logout", &cookie, None).await;
        assert_eq!(r.status, StatusCode::OK);
        let cleared = r.headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cleared.contains("Max-Age=0"));

        let r = send_with_cookie(&app, "GET", "/api/tasks", &cookie, None).await;
        assert_eq!(r.status, StatusCode::UNAUTHORIZED);

        // logging out again with the dead session is still fine
        let r = send_with_cookie(&app, "POST", "/api/auth/logout", &cookie, None).await;
        assert_eq!(r.status, StatusCode::OK);

        let r = send(
            &app,
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "a@x.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(r.status, StatusCode::OK);
        let fresh = session_cookie(&r.headers);
        assert_ne!(fresh, cookie);
        let r = send_with_cookie(&app, "GET", "/api/tasks", &fresh, None).await;
        assert_eq!(r.body["data"][0]["title"], "Cookie task");
    }
}
