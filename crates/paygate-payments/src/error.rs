//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Processor rejected the request
    #[error("Provider error: {0}")]
    Provider(String),

    /// Network/HTTP failure talking to the processor
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    /// Processor does not know the payment id
    #[error("Unknown payment: {0}")]
    UnknownPayment(String),

    /// Price cannot be charged (amount, currency)
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PaymentError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, PaymentError::Provider(_) | PaymentError::Unreachable(_))
    }

    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::Provider(_) => "Payment processing failed. Please try again.",
            PaymentError::Unreachable(_) => {
                "The payment provider is unreachable right now. Please try again in a moment."
            }
            PaymentError::UnknownPayment(_) => "The payment could not be found.",
            PaymentError::InvalidPrice(_) => "This tool is misconfigured: its price cannot be charged.",
            PaymentError::Config(_) => "Service configuration error.",
        }
    }
}

impl From<anyhow::Error> for PaymentError {
    fn from(err: anyhow::Error) -> Self {
        PaymentError::Provider(err.to_string())
    }
}
