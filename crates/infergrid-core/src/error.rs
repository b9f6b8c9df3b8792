//! Error taxonomy shared by every InferGrid component.

use thiserror::Error;

/// Result type alias for control-plane operations.
pub type PlatformResult<T> = Result<T, PlatformError>;

/// Errors surfaced by the registry, router, budget and scaler.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlatformError {
    /// Unknown feature, service, budget, or scale config.
    #[error("not found: {0}")]
    NotFound(String),

    /// No healthy instance, no active key, or an empty candidate set.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Bad or stale heartbeat token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{reason}")]
    BudgetExceeded { scope: String, reason: String },

    /// A provider call failed.
    #[error("provider error [{code}]: {message}")]
    Provider {
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PlatformError {
    /// Build a provider error.
    pub fn provider(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Whether a retry against the same target could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::Unavailable(_) => true,
            _ => false,
        }
    }

    /// Stable numeric code carried in the gateway error envelope.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Unauthorized(_) => 1002,
            Self::BudgetExceeded { .. } => 1004,
            Self::NotFound(_) => 4004,
            Self::Provider { .. } => 5001,
            Self::Unavailable(_) => 5003,
            Self::Cluster(_) => 5004,
            Self::Storage(_) => 5005,
        }
    }

    /// HTTP status class the gateway maps this error to.
    pub fn status_class(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Unavailable(_) => 503,
            Self::Unauthorized(_) => 401,
            Self::BudgetExceeded { .. } => 429,
            Self::InvalidRequest(_) => 400,
            Self::Provider { retryable: true, .. } => 502,
            Self::Provider { .. } | Self::Cluster(_) | Self::Storage(_) => 500,
        }
    }
}
