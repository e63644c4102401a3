//! Error types for Turnstile.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limiting rule was rejected at registration time
    #[error("Invalid limit for action '{action}': {reason}")]
    InvalidLimit { action: String, reason: String },

    /// Counter store failures. Never a rate-limit decision.
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// Raised by `ensure_rate_limit` when a check is denied
    #[error("Rate limit exceeded for action '{action}'")]
    RateLimited { action: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
