use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::crypto::integrity::IntegrityValidator;
use crate::crypto::xmldsig::{XmlDsigVerifier, load_trusted_key};
use crate::device::DeviceGateway;
use crate::device::simulated::SimulatedGateway;
use crate::middleware_layer::rate_limit::SlidingWindowLimiter;
use crate::services::reader::{CardReaderService, ReaderSettings};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Per-client limiter for card reads.
    pub rate_limiter: Arc<SlidingWindowLimiter>,
    /// The card-read orchestrator owning the reader.
    pub reader: CardReaderService,
}

impl AppState {
    /// Creates a new `AppState` backed by the simulated reader.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_gateway(config, Box::new(SimulatedGateway::new()))
    }

    /// Creates a new `AppState` around the given reader toolkit.
    pub fn with_gateway(config: &Config, gateway: Box<dyn DeviceGateway>) -> Result<Self> {
        let validator = if config.validate_response_integrity {
            let verifier = match &config.trusted_signer_key_path {
                Some(path) => {
                    let pem = std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read signer key {}", path.display()))?;
                    let key = load_trusted_key(&pem)
                        .with_context(|| format!("Invalid signer key {}", path.display()))?;
                    tracing::info!("✅ Trusted signer key loaded from {}", path.display());
                    XmlDsigVerifier::with_trusted_key(key)
                }
                None => {
                    tracing::warn!(
                        "⚠️ No trusted signer key configured; signatures are checked against the key embedded in each payload"
                    );
                    XmlDsigVerifier::new()
                }
            };
            Some(IntegrityValidator::new(Arc::new(verifier)))
        } else {
            None
        };

        let reader = CardReaderService::new(gateway, validator, ReaderSettings::from(config));
        tracing::info!("✅ Card reader service initialized");

        let rate_limiter = Arc::new(SlidingWindowLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window(),
        ));
        tracing::info!(
            "✅ Read rate limiter initialized ({} per {}s)",
            config.rate_limit_max_requests,
            config.rate_limit_window_secs
        );

        Ok(AppState {
            config: config.clone(),
            rate_limiter,
            reader,
        })
    }
}
