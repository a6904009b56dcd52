use std::time::Duration;

/// Typed error hierarchy for calls against the hosted backend
/// (REST reads and writes, the realtime socket, and auth).
#[derive(Clone, Debug, thiserror::Error)]
pub enum BackendError {
    // Caller problems: retrying won't help
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),

    // Transient
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),

    // Protocol
    #[error("decode error: {0}")]
    Decode(String),
    #[error("realtime error: {0}")]
    Realtime(String),
    #[error("channel closed")]
    ChannelClosed,
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Network(_)
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::Decode(_) => "decode_error",
            Self::Realtime(_) => "realtime_error",
            Self::ChannelClosed => "channel_closed",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            404 => Self::NotFound(body),
            400 | 406 | 409 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// A change notification that could not be turned into a typed record.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("notification for table {actual} routed to {expected}")]
    WrongTable { expected: &'static str, actual: &'static str },
    #[error("{table} record is malformed: {reason}")]
    Malformed { table: &'static str, reason: String },
    #[error("{table} delete carries no identity")]
    MissingIdentity { table: &'static str },
}
