//! Error Types for Payment Flows

use thiserror::Error;

use paygate_core::CoreError;
use paygate_payments::PaymentError;

pub type Result<T> = std::result::Result<T, FlowError>;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Unknown payment flow: {0}")]
    UnknownFlow(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Payment(#[from] PaymentError),
}
