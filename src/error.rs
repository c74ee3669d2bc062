use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or rejected credential (HTTP 401 equivalent).
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Any other non-success HTTP status.
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed JSON in a push frame or handshake payload.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Not on a recognizable pull request page. Callers treat this as a no-op.
    #[error("Not on a discussion page: {0}")]
    NavigationMismatch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Token store error: {0}")]
    Storage(String),

    #[error("Push connection error: {0}")]
    Push(String),

    #[error("Sign-in failed: {0}")]
    Handshake(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, AppError::Authorization(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::Push(e.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(e: toml::de::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(e: toml::ser::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
