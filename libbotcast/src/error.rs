//! Error types for Botcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotcastError>;

#[derive(Error, Debug)]
pub enum BotcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BotcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BotcastError::InvalidInput(_) => 3,
            BotcastError::Backend(BackendError::Authentication(_)) => 2,
            BotcastError::Backend(_) => 1,
            BotcastError::Config(_) => 1,
            BotcastError::History(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Backend registered more than once: {0}")]
    DuplicateBackend(String),
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("History JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid history entry: {0}")]
    InvalidEntry(String),
}

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Media upload failed: {0}")]
    Upload(String),

    #[error("Service rejected request{}: {message}", code_suffix(.code))]
    Api { code: Option<i64>, message: String },
}

fn code_suffix(code: &Option<i64>) -> String {
    match code {
        Some(code) => format!(" (code {})", code),
        None => String::new(),
    }
}

impl BackendError {
    /// Numeric error code reported by the remote service, when there is one
    pub fn code(&self) -> Option<i64> {
        match self {
            BackendError::Api { code, .. } => *code,
            _ => None,
        }
    }

    /// Error message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            BackendError::Authentication(msg)
            | BackendError::Posting(msg)
            | BackendError::Network(msg)
            | BackendError::RateLimit(msg)
            | BackendError::Upload(msg) => msg,
            BackendError::Api { message, .. } => message,
        }
    }
}
