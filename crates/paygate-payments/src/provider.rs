//! Payment Provider Strategy Pattern
//!
//! One implementation per processor (Stripe, PayPal, ...). The flows only
//! ever create a charge and ask for its status.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::status::PaymentStatus;

/// A charge created at the processor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPayment {
    /// Processor-side payment identifier
    pub payment_id: String,

    /// Where the payer completes the payment
    pub payment_url: String,
}

/// Payment provider trait (Strategy pattern)
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name (also namespaces anonymous state keys)
    fn name(&self) -> &str;

    /// Create a charge for `amount` in `currency`
    async fn create_payment(&self, amount: Decimal, currency: &str, description: &str) -> Result<CreatedPayment>;

    /// Raw processor status for a payment
    async fn get_payment_status(&self, payment_id: &str) -> Result<String>;

    /// Normalized status for a payment
    async fn status(&self, payment_id: &str) -> Result<PaymentStatus> {
        let raw = self.get_payment_status(payment_id).await?;
        Ok(PaymentStatus::normalize(Some(&raw)))
    }
}
