use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use garde::Validate;
use zeroize::Zeroizing;

/// What to do with a read request that arrives while another read holds the reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Queue behind the current read, bounded by the read timeout.
    Wait,
    /// Fail immediately.
    Reject,
}

/// How the listener terminates TLS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TlsMode {
    /// Serve the certificate and key found at these PEM paths.
    Files { cert: PathBuf, key: PathBuf },
    /// Generate a self-signed certificate for `localhost` at startup.
    SelfSigned,
    /// Plain HTTP, for development only.
    Disabled,
}

/// The application's configuration.
#[derive(Clone, Validate)]
pub struct Config {
    /// The localhost port to listen on.
    #[garde(range(min = 1))]
    pub port: u16,
    /// The secret callers must present in `X-Shared-Secret`.
    #[garde(skip)]
    pub shared_secret: Zeroizing<String>,
    /// Browser origins allowed through CORS.
    #[garde(inner(length(min = 1)))]
    pub allowed_origins: Vec<String>,
    /// Whether the toolkit runs in process mode.
    #[garde(skip)]
    pub ica_process_mode: bool,
    /// The toolkit configuration path.
    #[garde(length(min = 1))]
    pub ica_config_path: String,
    /// The reader to prefer when several are attached.
    #[garde(length(max = 256))]
    pub ica_preferred_reader_name: String,
    /// Whether card payloads must pass the correlation and signature checks.
    #[garde(skip)]
    pub validate_response_integrity: bool,
    /// PEM file holding the toolkit's signing key or certificate.
    #[garde(skip)]
    pub trusted_signer_key_path: Option<PathBuf>,
    /// Overall deadline for one read, in seconds.
    #[garde(range(min = 1, max = 600))]
    pub read_timeout_secs: u64,
    /// What to do when the reader is already in use.
    #[garde(skip)]
    pub busy_policy: BusyPolicy,
    /// Requests admitted per client within the window.
    #[garde(range(min = 1))]
    pub rate_limit_max_requests: u32,
    /// The rate-limit window in seconds.
    #[garde(range(min = 1))]
    pub rate_limit_window_secs: u64,
    /// How TLS is terminated.
    #[garde(skip)]
    pub tls: TlsMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 9443,
            shared_secret: Zeroizing::new(String::new()),
            allowed_origins: Vec::new(),
            ica_process_mode: true,
            ica_config_path: "config_ap".to_string(),
            ica_preferred_reader_name: String::new(),
            validate_response_integrity: false,
            trusted_signer_key_path: None,
            read_timeout_secs: 30,
            busy_policy: BusyPolicy::Wait,
            rate_limit_max_requests: 5,
            rate_limit_window_secs: 60,
            tls: TlsMode::SelfSigned,
        }
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let tls = if env_bool("TLS_DISABLED", false)? {
            TlsMode::Disabled
        } else {
            match (env::var("TLS_CERT_PATH").ok(), env::var("TLS_KEY_PATH").ok()) {
                (Some(cert), Some(key)) => TlsMode::Files {
                    cert: cert.into(),
                    key: key.into(),
                },
                (None, None) => TlsMode::SelfSigned,
                _ => anyhow::bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together"),
            }
        };

        let busy_policy = match env::var("DEVICE_BUSY_POLICY")
            .unwrap_or_else(|_| "wait".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "wait" => BusyPolicy::Wait,
            "reject" => BusyPolicy::Reject,
            other => anyhow::bail!("Invalid DEVICE_BUSY_POLICY {:?} (expected wait or reject)", other),
        };

        let config = Self {
            port: env_parse("AGENT_PORT", defaults.port)?,
            shared_secret: Zeroizing::new(env::var("AGENT_SHARED_SECRET").unwrap_or_default()),
            allowed_origins: env::var("AGENT_ALLOWED_ORIGINS")
                .map(|raw| parse_list(&raw))
                .unwrap_or_default(),
            ica_process_mode: env_bool("ICA_PROCESS_MODE", defaults.ica_process_mode)?,
            ica_config_path: env::var("ICA_CONFIG_PATH").unwrap_or(defaults.ica_config_path),
            ica_preferred_reader_name: env::var("ICA_PREFERRED_READER_NAME")
                .unwrap_or_default()
                .trim()
                .to_string(),
            validate_response_integrity: env_bool(
                "ICA_VALIDATE_RESPONSE_INTEGRITY",
                defaults.validate_response_integrity,
            )?,
            trusted_signer_key_path: env::var("ICA_TRUSTED_SIGNER_KEY").ok().map(PathBuf::from),
            read_timeout_secs: env_parse("READ_TIMEOUT_SECS", defaults.read_timeout_secs)?,
            busy_policy,
            rate_limit_max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", defaults.rate_limit_max_requests)?,
            rate_limit_window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs)?,
            tls,
        };

        config
            .validate()
            .map_err(|report| anyhow::anyhow!("Invalid configuration: {}", report))?;

        Ok(config)
    }

    /// The overall deadline for one card read.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// The rate-limit window.
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => parse_bool(&raw).with_context(|| format!("Invalid {} (expected true or false)", name)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
