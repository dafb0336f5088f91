use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eid_agent::{build_router, config::Config, state::AppState, tls};

/// How often idle rate-limit buckets are swept.
const EVICTION_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    if config.shared_secret.trim().is_empty() {
        tracing::warn!("⚠️ AGENT_SHARED_SECRET is empty; every authenticated request will be rejected");
    }
    if !config.validate_response_integrity {
        tracing::warn!("⚠️ Response integrity validation is disabled; card data is returned unverified");
    }

    let state = AppState::new(&config)?;
    tracing::info!("✅ AppState initialized");

    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(EVICTION_INTERVAL).await;
            let evicted = limiter.evict_idle();
            if evicted > 0 {
                tracing::debug!("🧹 Evicted {} idle rate-limit buckets", evicted);
            }
        }
    });

    let app = build_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    match tls::rustls_config(&config.tls).await? {
        Some(tls_config) => {
            tracing::info!("🚀 Agent listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .context("HTTPS server failed")?;
        }
        None => {
            tracing::info!("🚀 Agent listening on http://{}", addr);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .context("HTTP server failed")?;
        }
    }

    Ok(())
}
