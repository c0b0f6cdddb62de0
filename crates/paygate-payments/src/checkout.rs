//! Stripe Checkout Integration
//!
//! Charges are Stripe Checkout Sessions in `payment` mode; the payer is sent
//! to the hosted checkout page and the session's payment status is polled.

use async_trait::async_trait;
use rust_decimal::Decimal;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionStatus, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionLineItemsPriceData,
    CreateCheckoutSessionLineItemsPriceDataProductData, Currency, StripeError,
};

use crate::error::{PaymentError, Result};
use crate::price::Price;
use crate::provider::{CreatedPayment, PaymentProvider};

const DEFAULT_SUCCESS_URL: &str = "https://example.com/payment/success";
const DEFAULT_CANCEL_URL: &str = "https://example.com/payment/cancel";

/// Stripe client wrapper
pub struct StripeProvider {
    client: Client,
    success_url: String,
    cancel_url: String,
}

impl StripeProvider {
    /// Create a new Stripe provider
    pub fn new(secret_key: &str) -> Self {
        Self {
            client: Client::new(secret_key),
            success_url: DEFAULT_SUCCESS_URL.into(),
            cancel_url: DEFAULT_CANCEL_URL.into(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaymentError::Config("STRIPE_SECRET_KEY not set".into()))?;

        let mut provider = Self::new(&secret_key);
        if let Ok(url) = std::env::var("STRIPE_SUCCESS_URL") {
            provider.success_url = url;
        }
        if let Ok(url) = std::env::var("STRIPE_CANCEL_URL") {
            provider.cancel_url = url;
        }
        Ok(provider)
    }

    /// Where Stripe redirects after checkout
    pub fn with_redirects(mut self, success_url: impl Into<String>, cancel_url: impl Into<String>) -> Self {
        self.success_url = success_url.into();
        self.cancel_url = cancel_url.into();
        self
    }

    /// Get the underlying Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn map_stripe_error(err: StripeError) -> PaymentError {
    match err {
        StripeError::Stripe(request) => PaymentError::Provider(request.to_string()),
        other => PaymentError::Unreachable(other.to_string()),
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn name(&self) -> &str {
        "stripe"
    }

    async fn create_payment(&self, amount: Decimal, currency: &str, description: &str) -> Result<CreatedPayment> {
        let price = Price::new(amount, currency)?;
        let stripe_currency: Currency = price
            .currency
            .to_lowercase()
            .parse()
            .map_err(|_| PaymentError::InvalidPrice(format!("unsupported currency {}", price.currency)))?;

        let mut params = CreateCheckoutSession::new();
        params.success_url = Some(self.success_url.as_str());
        params.cancel_url = Some(self.cancel_url.as_str());
        params.mode = Some(CheckoutSessionMode::Payment);

        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            quantity: Some(1),
            price_data: Some(CreateCheckoutSessionLineItemsPriceData {
                currency: stripe_currency,
                unit_amount: Some(price.minor_units()?),
                product_data: Some(CreateCheckoutSessionLineItemsPriceDataProductData {
                    name: description.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]);

        let session = CheckoutSession::create(&self.client, params)
            .await
            .map_err(map_stripe_error)?;

        let payment_url = session
            .url
            .ok_or_else(|| PaymentError::Provider("No checkout URL returned".into()))?;

        tracing::info!(payment_id = %session.id, price = %price, "Created Stripe checkout session");

        Ok(CreatedPayment {
            payment_id: session.id.to_string(),
            payment_url,
        })
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<String> {
        let id: CheckoutSessionId = payment_id
            .parse()
            .map_err(|_| PaymentError::UnknownPayment(payment_id.to_string()))?;

        let session = CheckoutSession::retrieve(&self.client, &id, &[])
            .await
            .map_err(map_stripe_error)?;

        // An expired session can never be paid, whatever its payment status says.
        if session.status == Some(CheckoutSessionStatus::Expired) {
            return Ok("expired".into());
        }
        Ok(session.payment_status.as_str().to_string())
    }
}
