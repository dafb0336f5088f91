//! A localhost agent that reads Emirates ID cards from an attached reader
//! and serves the public data over HTTPS to authenticated local callers.

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use http::HeaderValue;
use tracing::Level;

pub mod config;
pub mod device;
pub mod error;
pub mod state;
pub mod tls;

pub mod crypto {
    pub mod c14n;
    pub mod integrity;
    pub mod request_id;
    pub mod xmldsig;

    #[cfg(test)]
    pub(crate) mod testing;
}

pub mod models {
    pub mod card;
    pub mod session;
}

pub mod services {
    pub mod error_map;
    pub mod masking;
    pub mod reader;
}

pub mod handlers {
    pub mod config;
    pub mod eid;
    pub mod health;
    pub mod json;
}

pub mod middleware_layer {
    pub mod auth;
    pub mod rate_limit;
}

use state::AppState;

/// Assembles the agent's routes and layers.
///
/// `/health` is public, `/config` requires the shared secret and
/// `/read-eid` requires the secret and then a rate-limit admission.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .with_state(state.clone());

    let config_routes = Router::new()
        .route("/config", get(handlers::config::get_config))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_shared_secret,
        ))
        .with_state(state.clone());

    let read_routes = Router::new()
        .route("/read-eid", post(handlers::eid::read_eid))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_read,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::auth::require_shared_secret,
        ))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(config_routes)
        .merge(read_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        );

    match cors_layer(&state.config.allowed_origins) {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("⚠️ Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}
