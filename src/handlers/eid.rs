use axum::{extract::State, response::Response};
use tokio_util::sync::CancellationToken;

use crate::{error::Result, handlers::json, state::AppState};

/// Reads the inserted Emirates ID card.
///
/// The read is cancelled if this future is dropped before it completes,
/// which is what happens when the client disconnects.
pub async fn read_eid(State(state): State<AppState>) -> Result<Response> {
    tracing::info!("🪪 Card read requested");

    let cancel = CancellationToken::new();
    let on_disconnect = cancel.clone().drop_guard();

    let result = state.reader.read(cancel).await;
    on_disconnect.disarm();

    json::ok(&result?)
}
