use thiserror::Error;

/// Discord JSON error code for a channel that no longer exists.
pub const UNKNOWN_CHANNEL: u32 = 10003;

/// Errors surfaced by the chat platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// An HTTP-level transport error occurred.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered with a non-success status.
    #[error("API error {status} (code {code}): {message}")]
    Api {
        status: u16,
        code: u32,
        message: String,
    },

    /// The channel was deleted or never existed.
    #[error("unknown channel")]
    UnknownChannel,

    /// The bot lacks a permission the operation needs.
    #[error("missing permission: {0}")]
    MissingPermission(String),

    /// HTTP 429. `retry_after` is in seconds.
    #[error("rate limited (retry after {retry_after}s)")]
    RateLimited { retry_after: f64 },

    /// A payload could not be encoded or decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The websocket session failed.
    #[error("gateway error: {0}")]
    Gateway(String),
}

impl PlatformError {
    /// Errors worth another try later, as opposed to ones that will keep failing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::RateLimited { .. } | Self::Gateway(_)
        ) || matches!(self, Self::Api { status, .. } if *status >= 500)
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PlatformError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Gateway(err.to_string())
    }
}
