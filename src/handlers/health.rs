use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::handlers::json;

/// The response payload for the liveness check.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ts: DateTime<Utc>,
}

/// Reports that the agent is up. Never touches the reader.
pub async fn health() -> Result<Response> {
    json::ok(&HealthResponse {
        status: "ok",
        ts: Utc::now(),
    })
}
