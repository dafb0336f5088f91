use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::{AppError, Result};

/// Serializes `value` with `sonic_rs` into a `200` JSON response.
pub fn ok<T: Serialize>(value: &T) -> Result<Response> {
    let body = sonic_rs::to_string(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialize response: {}", e)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response())
}
