//! # paygate-payments
//!
//! Payment processors behind one small contract.
//!
//! ## Provider contract
//!
//! ```text
//! ┌─────────────┐  create_payment   ┌─────────────────┐
//! │    Flow     │──────────────────▶│ PaymentProvider │──▶ Stripe / Mock / ...
//! │             │◀──────────────────│                 │
//! └─────────────┘  status (normalized)└───────────────┘
//! ```
//!
//! Raw processor statuses are folded into [`PaymentStatus`] (`paid`,
//! `pending`, `canceled`) so no flow ever matches on processor vocabulary.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use paygate_payments::{PaymentProvider, Price, StripeProvider};
//!
//! let stripe = StripeProvider::from_env()?;
//! let price = Price::new(dec!(0.50), "USD")?;
//!
//! let payment = stripe.create_payment(price.amount, &price.currency, "Report").await?;
//! // Send the payer to: payment.payment_url
//! let status = stripe.status(&payment.payment_id).await?;
//! ```

mod checkout;
mod error;
mod mock;
mod price;
mod provider;
mod status;

pub use checkout::StripeProvider;
pub use error::{PaymentError, Result};
pub use mock::MockProvider;
pub use price::Price;
pub use provider::{CreatedPayment, PaymentProvider};
pub use status::PaymentStatus;
