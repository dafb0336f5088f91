use axum::{extract::State, response::Response};
use serde::Serialize;

use crate::{error::Result, handlers::json, state::AppState};

/// The non-secret configuration exposed to authenticated callers.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse<'a> {
    pub port: u16,
    pub allowed_origins: &'a [String],
}

/// Returns the listening port and allowed origins.
pub async fn get_config(State(state): State<AppState>) -> Result<Response> {
    json::ok(&ConfigResponse {
        port: state.config.port,
        allowed_origins: &state.config.allowed_origins,
    })
}
