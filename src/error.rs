use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// The closed set of outcomes a failed request can report to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CardNotPresent,
    ReaderNotFound,
    Timeout,
    Unauthorized,
    RateLimited,
    InternalError,
}

impl ErrorKind {
    /// The stable wire code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::CardNotPresent => "card_not_present",
            ErrorKind::ReaderNotFound => "reader_not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// The HTTP status a response of this kind is sent with.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::CardNotPresent | ErrorKind::ReaderNotFound => StatusCode::BAD_REQUEST,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The human-readable message sent alongside the code, if any.
    pub fn default_message(self) -> Option<&'static str> {
        match self {
            ErrorKind::CardNotPresent => Some("No Emirates ID detected on reader."),
            ErrorKind::ReaderNotFound => Some("HID reader not detected."),
            ErrorKind::Timeout => Some("Read operation timed out."),
            ErrorKind::InternalError => Some("Internal error"),
            ErrorKind::Unauthorized | ErrorKind::RateLimited => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// The shared secret was missing or did not match.
    #[error("Authorization failed")]
    Unauthorized,

    /// The client exhausted its request budget.
    #[error("Rate limit exceeded for {client}")]
    RateLimitExceeded {
        client: String,
        retry_after_secs: u64,
    },

    /// A card read failed with a mapped outcome.
    ///
    /// `detail` is for logs only and never leaves the process.
    #[error("Card read failed ({kind}): {detail}")]
    Read {
        kind: ErrorKind,
        message: Option<String>,
        detail: String,
    },

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The taxonomy entry this error is reported as.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Unauthorized => ErrorKind::Unauthorized,
            AppError::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            AppError::Read { kind, .. } => *kind,
            AppError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let mut retry_after = None;

        let message: Option<String> = match self {
            AppError::Unauthorized => {
                tracing::warn!("🔒 Shared secret missing or mismatched");
                None
            }

            AppError::RateLimitExceeded {
                ref client,
                retry_after_secs,
            } => {
                tracing::warn!("🚦 Rate limit exceeded for {}", client);
                retry_after = Some(retry_after_secs);
                None
            }

            AppError::Read {
                kind,
                message,
                ref detail,
            } => {
                if kind == ErrorKind::InternalError {
                    tracing::error!("❌ Card read failed: {}", detail);
                } else {
                    tracing::warn!("⚠️ Card read failed ({}): {}", kind, detail);
                }
                message.or_else(|| kind.default_message().map(str::to_string))
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                kind.default_message().map(str::to_string)
            }
        };

        let body = sonic_rs::to_string(&ErrorBody {
            error: kind.code(),
            message: message.as_deref(),
        })
        .unwrap_or_else(|_| r#"{"error":"internal_error"}"#.to_string());

        let mut response = (
            kind.status(),
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            body,
        )
            .into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}
