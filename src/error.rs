use thiserror::Error;
use tokio::task::JoinError;

#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("HTTP request failed: {0}")]
    Reqwest(String),
    #[error("Filesystem I/O error: {0}")]
    Io(String),
    #[error("JSON parsing error: {0}")]
    SerdeParse(String),
    #[error("JSON serialization error: {0}")]
    SerdeSerialize(String),
    #[error("HTTP {status} from {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },
    #[error("Resource not found: {url}")]
    NotFound { url: String },
    #[error("Error initializing entity {entity}: {message}")]
    EntityInit { entity: String, message: String },
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("Invalid argument provided: {0}")]
    Argument(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Tokio task join error: {0}")]
    JoinError(String),
    #[error("Task panicked: {0}")]
    TaskPanic(String),
    #[error("Timeout during operation: {0}")]
    Timeout(String),
    #[error("Semaphore acquisition error: {0}")]
    SemaphoreAcquire(String),
    #[error("Unexpected internal error: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Reqwest(e.to_string())
    }
}
impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}
impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_io() || e.is_eof() || e.is_syntax() || e.is_data() {
            AppError::SerdeParse(e.to_string())
        } else {
            AppError::SerdeSerialize(e.to_string())
        }
    }
}
impl From<JoinError> for AppError {
    fn from(e: JoinError) -> Self {
        AppError::JoinError(e.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn entity_init<S: Into<String>>(entity: &str, message: S) -> AppError {
        AppError::EntityInit {
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    /// Errors that reject the run before any work is dispatched.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AppError::Argument(_) | AppError::ConfigError(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }

    /// Whether a failed request is worth repeating.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Http { status, .. } => *status == 429 || *status >= 500,
            AppError::Reqwest(_) | AppError::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_infrastructure_errors() {
        assert!(AppError::Argument("empty list".into()).is_infrastructure());
        assert!(AppError::ConfigError("batch size".into()).is_infrastructure());
        assert!(!AppError::Archive("disk full".into()).is_infrastructure());
    }

    #[test]
    fn retries_only_transient_http_failures() {
        let throttled = AppError::Http {
            status: 429,
            url: "u".into(),
            message: "slow down".into(),
        };
        let forbidden = AppError::Http {
            status: 403,
            url: "u".into(),
            message: "no".into(),
        };
        assert!(throttled.is_retryable());
        assert!(!forbidden.is_retryable());
        assert!(!AppError::NotFound { url: "u".into() }.is_retryable());
    }

    #[test]
    fn entity_init_message_names_entity() {
        let e = AppError::entity_init("ZZZZ", "ticker not found");
        assert_eq!(
            e.to_string(),
            "Error initializing entity ZZZZ: ticker not found"
        );
    }
}
