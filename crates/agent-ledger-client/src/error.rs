//! Client error types.

use rust_decimal::Decimal;

/// Errors that can occur when using the agent ledger client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The paying account cannot cover the amount.
    #[error("insufficient credits: available={available}, required={required}")]
    InsufficientCredits {
        /// Spendable balance.
        available: Decimal,
        /// Amount requested.
        required: Decimal,
    },

    /// The caller may not do this, e.g. a disabled skill.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A skill category limit was hit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status == 503,
            _ => false,
        }
    }
}
