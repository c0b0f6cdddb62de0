//! Tool Prices

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

/// Currencies charged in whole units by card processors
const ZERO_DECIMAL_CURRENCIES: &[&str] = &["BIF", "CLP", "JPY", "KRW", "PYG", "VND", "XAF", "XOF"];

/// Price of one tool invocation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Decimal,
    pub currency: String,
}

impl Price {
    /// Create a price; the amount must be positive and the currency an ISO-4217 code
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Result<Self> {
        let currency = currency.into().trim().to_uppercase();
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidPrice(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::InvalidPrice(format!(
                "currency must be a 3-letter code, got '{}'",
                currency
            )));
        }
        Ok(Self { amount, currency })
    }

    /// Amount in the currency's smallest unit (cents for USD)
    pub fn minor_units(&self) -> Result<i64> {
        let scale = if ZERO_DECIMAL_CURRENCIES.contains(&self.currency.as_str()) {
            Decimal::ONE
        } else {
            Decimal::ONE_HUNDRED
        };
        self.amount
            .checked_mul(scale)
            .and_then(|units| units.round().to_i64())
            .ok_or_else(|| PaymentError::InvalidPrice(format!("amount {} out of range", self.amount)))
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} {}", self.amount, self.currency)
    }
}
