use hyper::StatusCode;
use thiserror::Error;

/// Unified error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No target URL provided")]
    MissingTarget,

    #[error("No proxies provided")]
    NoProxiesConfigured,

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Upstream errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("CONNECT failed: {0}")]
    ConnectFailed(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Connection establishment timed out")]
    Timeout,

    #[error("Request timeout")]
    RequestTimeout,

    #[error("HTTP error: {0}")]
    Http(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            // 502 Bad Gateway, upstream failures all surface as a gateway failure
            RelayError::ProxyConnectionFailed(_)
            | RelayError::ConnectFailed(_)
            | RelayError::Tls(_)
            | RelayError::Timeout
            | RelayError::RequestTimeout
            | RelayError::Http(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            RelayError::InvalidConfig(_)
            | RelayError::MissingTarget
            | RelayError::NoProxiesConfigured
            | RelayError::InvalidUrl { .. }
            | RelayError::UnsupportedProtocol(_)
            | RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error happened while talking to a forward-proxy or the target
    pub fn is_upstream(&self) -> bool {
        self.status_code() == StatusCode::BAD_GATEWAY
    }
}
