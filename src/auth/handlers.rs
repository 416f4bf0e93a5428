use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::instrument;

use crate::{
    auth::{
        dto::{AuthResponse, LoginRequest, SignupRequest},
        extractors::{AuthUser, PresentedProof},
        proof::ProofTransport,
        services::Authenticated,
    },
    config::SessionConfig,
    error::AppResult,
    response::{reply, Message},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/profile", get(profile))
}

fn session_cookie(cfg: &SessionConfig, value: &str, max_age_secs: i64) -> AppResult<HeaderValue> {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite={}; Max-Age={}",
        cfg.cookie_name,
        value,
        cfg.same_site.as_str(),
        max_age_secs.max(0)
    );
    if cfg.secure {
        cookie.push_str("; Secure");
    }
    Ok(HeaderValue::from_str(&cookie).context("build session cookie")?)
}

/// Hands the new proof to the client the way the active mechanism expects.
fn authenticated_response(
    state: &AppState,
    status: StatusCode,
    Authenticated { user, proof }: Authenticated,
) -> AppResult<Response> {
    match state.auth.transport() {
        ProofTransport::BearerHeader => Ok(reply(
            status,
            AuthResponse {
                user,
                token: Some(proof.value),
                expires_at: proof.expires_at,
            },
        )),
        ProofTransport::Cookie => {
            let max_age = (proof.expires_at - OffsetDateTime::now_utc()).whole_seconds();
            let cookie = session_cookie(&state.config.session, &proof.value, max_age)?;
            let mut res = reply(
                status,
                AuthResponse {
                    user,
                    token: None,
                    expires_at: proof.expires_at,
                },
            );
            res.headers_mut().insert(header::SET_COOKIE, cookie);
            Ok(res)
        }
    }
}

#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(payload) = payload?;
    let out = state.auth.signup(payload).await?;
    authenticated_response(&state, StatusCode::CREATED, out)
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(payload) = payload?;
    let out = state.auth.login(payload).await?;
    authenticated_response(&state, StatusCode::OK, out)
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    PresentedProof(proof): PresentedProof,
) -> AppResult<Response> {
    state.auth.logout(proof.as_deref()).await?;
    let mut res = reply(
        StatusCode::OK,
        Message {
            message: "Logged out successfully",
        },
    );
    if state.auth.transport() == ProofTransport::Cookie {
        let cleared = session_cookie(&state.config.session, "", 0)?;
        res.headers_mut().insert(header::SET_COOKIE, cleared);
    }
    Ok(res)
}

#[instrument(skip(state))]
pub async fn profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Response> {
    let user = state.auth.profile(user_id).await?;
    Ok(reply(StatusCode::OK, user))
}
