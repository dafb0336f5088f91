use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::{error::AppError, state::AppState};

/// The header carrying the caller's shared secret.
pub const SHARED_SECRET_HEADER: &str = "x-shared-secret";

/// Checks the presented secret against the configured one.
///
/// An empty configured secret never matches.
fn secret_matches(headers: &HeaderMap, expected: &str) -> bool {
    if expected.trim().is_empty() {
        return false;
    }

    headers
        .get(SHARED_SECRET_HEADER)
        .map(|provided| provided.as_bytes().ct_eq(expected.as_bytes()).into())
        .unwrap_or(false)
}

/// A middleware that requires the shared secret to be present.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `request` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response`, or `401 {"error":"unauthorized"}`.
pub async fn require_shared_secret(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    tracing::debug!("🔐 Checking shared secret...");

    if !secret_matches(request.headers(), &state.config.shared_secret) {
        return AppError::Unauthorized.into_response();
    }

    next.run(request).await
}
