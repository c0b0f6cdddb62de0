//! Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    /// Tool not found on the host
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool already registered under this name
    #[error("Tool already registered: {0}")]
    ToolExists(String),

    /// Tool validation failed
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Tool execution failed
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// The peer does not implement the requested method (e.g. elicitation)
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Host round-trip failed (notification, elicitation transport)
    #[error("Host error: {0}")]
    Host(String),

    /// State store backend failed
    #[error("Store error: {0}")]
    Store(String),

    /// Structured, error-coded protocol outcome
    #[error("{0}")]
    Protocol(Box<ProtocolError>),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Host(_) | CoreError::Store(_) => true,
            CoreError::Protocol(err) => err.code.is_retryable(),
            _ => false,
        }
    }

    /// The structured protocol error, if this is one
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            CoreError::Protocol(err) => Some(err),
            _ => None,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            CoreError::ToolNotFound(name) => format!("The tool '{}' is not available.", name),
            CoreError::ToolValidation(msg) => format!("Invalid tool input: {}", msg),
            CoreError::ToolExecution(msg) => format!("Tool error: {}", msg),
            CoreError::MethodNotFound(_) => "The client does not support this request.".into(),
            CoreError::Protocol(err) => err.message.clone(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<ProtocolError> for CoreError {
    fn from(err: ProtocolError) -> Self {
        CoreError::Protocol(Box::new(err))
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Other(err.to_string())
    }
}

/// Machine-readable code carried by a [`ProtocolError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PaymentRequired,
    PaymentPending,
    PaymentCanceled,
    PaymentUnknown,
    PaymentIdNotFound,
    UnknownOrExpiredPaymentId,
    PaymentNotPaid,
    ProviderUnreachable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PaymentRequired => "payment_required",
            ErrorCode::PaymentPending => "payment_pending",
            ErrorCode::PaymentCanceled => "payment_canceled",
            ErrorCode::PaymentUnknown => "payment_unknown",
            ErrorCode::PaymentIdNotFound => "payment_id_not_found",
            ErrorCode::UnknownOrExpiredPaymentId => "unknown_or_expired_payment_id",
            ErrorCode::PaymentNotPaid => "payment_not_paid",
            ErrorCode::ProviderUnreachable => "provider_unreachable",
        }
    }

    /// HTTP-equivalent status for the code
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::PaymentIdNotFound | ErrorCode::UnknownOrExpiredPaymentId => 404,
            ErrorCode::ProviderUnreachable => 502,
            _ => 402,
        }
    }

    /// Whether the caller can make progress by calling again
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorCode::PaymentIdNotFound | ErrorCode::UnknownOrExpiredPaymentId
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error-coded outcome returned by the synchronous payment protocols
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}
