//! Structured results returned in place of a tool's own output

use serde_json::{Map, Value, json};

use paygate_core::{PaymentAnnotation, PaymentState, ToolResult};
use paygate_payments::PaymentError;

use super::ledger::PaymentSession;

/// Builder for a payment-status result
pub(crate) struct Reply {
    status: PaymentState,
    message: String,
    payment_id: Option<String>,
    payment_url: Option<String>,
    reason: Option<&'static str>,
    next_step: Option<String>,
}

impl Reply {
    pub(crate) fn new(status: PaymentState, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            payment_id: None,
            payment_url: None,
            reason: None,
            next_step: None,
        }
    }

    pub(crate) fn pending(message: impl Into<String>) -> Self {
        Self::new(PaymentState::Pending, message)
    }

    pub(crate) fn canceled(message: impl Into<String>) -> Self {
        Self::new(PaymentState::Canceled, message)
    }

    pub(crate) fn error(reason: &'static str, message: impl Into<String>) -> Self {
        Self::new(PaymentState::Error, message).reason(reason)
    }

    /// The processor could not be reached to create or query a charge
    pub(crate) fn provider_unreachable(err: &PaymentError) -> Self {
        Self::error(
            "provider_unreachable",
            format!("The payment provider is unavailable: {}", err),
        )
    }

    pub(crate) fn session(mut self, session: &PaymentSession) -> Self {
        self.payment_id = Some(session.payment_id.clone());
        self.payment_url = Some(session.payment_url.clone());
        self
    }

    pub(crate) fn payment(mut self, payment_id: &str, payment_url: Option<&str>) -> Self {
        self.payment_id = Some(payment_id.to_string());
        self.payment_url = payment_url.map(str::to_string);
        self
    }

    pub(crate) fn reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }

    pub(crate) fn next_step(mut self, tool: impl Into<String>) -> Self {
        self.next_step = Some(tool.into());
        self
    }

    pub(crate) fn build(self) -> ToolResult {
        let mut data = Map::new();
        data.insert("status".into(), json!(self.status));
        data.insert("message".into(), json!(self.message));
        if let Some(id) = &self.payment_id {
            data.insert("payment_id".into(), json!(id));
        }
        if let Some(url) = &self.payment_url {
            data.insert("payment_url".into(), json!(url));
        }
        if let Some(reason) = self.reason {
            data.insert("reason".into(), json!(reason));
        }
        if let Some(tool) = &self.next_step {
            data.insert("next_step".into(), json!(tool));
        }

        let base = match self.status {
            PaymentState::Pending | PaymentState::Paid => ToolResult::success(self.message),
            _ => ToolResult::failure(self.message),
        };
        let result = base.with_data(Value::Object(data));

        match self.payment_id {
            Some(payment_id) => result.with_payment(PaymentAnnotation {
                status: self.status,
                payment_id,
                payment_url: self.payment_url,
            }),
            None => result,
        }
    }
}
