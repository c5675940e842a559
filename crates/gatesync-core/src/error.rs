use thiserror::Error;

/// Core error types for gatesync model handling
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid plan security type: {0}")]
    InvalidSecurityType(String),

    #[error("Invalid subscription status: {0}")]
    InvalidSubscriptionStatus(String),

    #[error("Invalid timestamp: {0}")]
    InvalidDateTime(String),

    #[error("Invalid API definition: {message}")]
    InvalidApi { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Time parsing error: {0}")]
    TimeError(#[from] time::error::Parse),
}

impl CoreError {
    /// Create a new InvalidSecurityType error
    pub fn invalid_security_type(value: impl Into<String>) -> Self {
        Self::InvalidSecurityType(value.into())
    }

    /// Create a new InvalidSubscriptionStatus error
    pub fn invalid_subscription_status(value: impl Into<String>) -> Self {
        Self::InvalidSubscriptionStatus(value.into())
    }

    /// Create a new InvalidDateTime error
    pub fn invalid_date_time(value: impl Into<String>) -> Self {
        Self::InvalidDateTime(value.into())
    }

    /// Create a new InvalidApi error
    pub fn invalid_api(message: impl Into<String>) -> Self {
        Self::InvalidApi {
            message: message.into(),
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
