use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use uuid::Uuid;

use super::proof::ProofTransport;
use crate::{error::AppError, state::AppState};

/// Authenticated caller: the user a valid identity proof resolves to.
pub struct AuthUser(pub Uuid);

/// The raw proof carried by the request, if any. Not verified.
pub struct PresentedProof(pub Option<String>);

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    // Expect "Bearer <token>"
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn presented_proof(parts: &Parts, state: &AppState) -> Option<String> {
    match state.auth.transport() {
        ProofTransport::BearerHeader => bearer_token(&parts.headers),
        ProofTransport::Cookie => cookie_value(&parts.headers, &state.config.session.cookie_name),
    }
}

#[async_trait]
impl FromRequestParts<AppState> for PresentedProof {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(PresentedProof(presented_proof(parts, state)))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let proof = presented_proof(parts, state).ok_or_else(AppError::not_authenticated)?;
        let user_id = state.auth.resolve(&proof).await?;
        Ok(AuthUser(user_id))
    }
}
