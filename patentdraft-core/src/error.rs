//! Error types for draft synchronization

use crate::SectionType;
use thiserror::Error;

/// Content composition errors.
///
/// These never reach cache state: callers degrade to empty content.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Reserved section {0} cannot be composed")]
    ReservedSection(SectionType),

    #[error("Unknown section type: {0}")]
    UnknownSection(String),
}

/// Cache store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Unexpected cache value under {key}: expected {expected}")]
    UnexpectedValue { key: String, expected: &'static str },
}

/// Remote fetch gateway errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, server errors, request timeouts and rate limits
    /// are transient. Other client errors and malformed responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Malformed(_) | Self::InvalidRequest(_) => false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or PATENTDRAFT_CONFIG)")]
    MissingConfigPath,

    #[error("Failed to read config file: {0}")]
    Io(String),

    #[error("Failed to parse config TOML: {0}")]
    Parse(String),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Master error type for draft synchronization.
#[derive(Debug, Clone, Error)]
pub enum DraftError {
    #[error("Compose error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Batch update contains no sections")]
    EmptyBatch,

    #[error("Autosaver has shut down")]
    AutosaveStopped,

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

impl DraftError {
    /// HTTP status of the underlying gateway failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Gateway(err) => err.status(),
            _ => None,
        }
    }

    /// Whether the failure came from a gateway call worth repeating.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Gateway(err) if err.is_transient())
    }
}

/// Result type alias for draft operations.
pub type DraftResult<T> = Result<T, DraftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_transience() {
        assert!(GatewayError::Transport("reset".into()).is_transient());
        assert!(GatewayError::Status { status: 503, message: String::new() }.is_transient());
        assert!(GatewayError::Status { status: 429, message: String::new() }.is_transient());
        assert!(GatewayError::Status { status: 408, message: String::new() }.is_transient());
        assert!(!GatewayError::Status { status: 404, message: String::new() }.is_transient());
        assert!(!GatewayError::Status { status: 422, message: String::new() }.is_transient());
        assert!(!GatewayError::Malformed("bad json".into()).is_transient());
    }

    #[test]
    fn test_draft_error_exposes_status() {
        let err: DraftError = GatewayError::Status {
            status: 409,
            message: "conflict".into(),
        }
        .into();
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("409"));

        assert!(!err.is_transient());

        let err: DraftError = GatewayError::Transport("reset".into()).into();
        assert!(err.is_transient());

        let err: DraftError = CacheError::LockPoisoned.into();
        assert_eq!(err.status(), None);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_compose_error_display() {
        let err = ComposeError::ReservedSection(SectionType::FullContent);
        assert!(err.to_string().contains("FULL_CONTENT"));
    }
}
