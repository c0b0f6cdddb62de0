//! Payment Flows
//!
//! Each flow is a [`ToolHandler`] that wraps a priced tool's own handler and
//! decides, per call, whether the charge is settled enough to run it.

mod auto;
mod elicitation;
mod ledger;
mod list_change;
mod progress;
mod reply;
mod resubmit;
mod two_step;

use std::sync::Arc;

use paygate_core::{
    PaymentAnnotation, PaymentState, SessionKey, StateStore, ToolContext, ToolHandler, ToolHost,
    ToolResult,
};
use paygate_payments::{PaymentProvider, Price};

use crate::config::PaygateConfig;

pub use auto::AutoFlow;
pub use elicitation::ElicitationFlow;
pub use ledger::PaymentSession;
pub use list_change::ListChangeFlow;
pub use progress::ProgressFlow;
pub use resubmit::ResubmitFlow;
pub use two_step::TwoStepFlow;

/// Collaborators shared by every gated tool of one host integration
#[derive(Clone)]
pub struct FlowDeps {
    pub host: Arc<dyn ToolHost>,
    pub provider: Arc<dyn PaymentProvider>,
    pub store: Arc<dyn StateStore>,
    pub config: Arc<PaygateConfig>,
}

impl FlowDeps {
    pub fn new(
        host: Arc<dyn ToolHost>,
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn StateStore>,
        config: PaygateConfig,
    ) -> Self {
        Self {
            host,
            provider,
            store,
            config: Arc::new(config),
        }
    }

    /// Key of a payment record as seen by the caller behind `ctx`
    pub(crate) fn payment_key(&self, ctx: &ToolContext, payment_id: &str) -> String {
        SessionKey::payment(self.provider.name(), ctx.session_id.as_ref(), payment_id).to_string()
    }
}

/// The tool being sold: its name, its price and the handler that does the work
#[derive(Clone)]
pub struct PricedTool {
    pub name: String,
    pub price: Price,
    pub handler: Arc<dyn ToolHandler>,
}

impl PricedTool {
    pub fn new(name: impl Into<String>, price: Price, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            name: name.into(),
            price,
            handler,
        }
    }

    /// Line-item description sent to the processor
    pub(crate) fn charge_description(&self) -> String {
        format!("{} for tool {}", self.price, self.name)
    }
}

/// Mark a handler result as paid for
pub(crate) fn annotate_paid(result: ToolResult, payment_id: &str) -> ToolResult {
    result.with_payment(PaymentAnnotation {
        status: PaymentState::Paid,
        payment_id: payment_id.to_string(),
        payment_url: None,
    })
}

/// Drop the resubmission id from arguments before they reach the tool
pub(crate) fn strip_payment_id(mut args: serde_json::Value) -> serde_json::Value {
    if let Some(map) = args.as_object_mut() {
        map.remove("payment_id");
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_payment_id() {
        let args = strip_payment_id(json!({"topic": "rust", "payment_id": "p1"}));
        assert_eq!(args, json!({"topic": "rust"}));
        assert_eq!(strip_payment_id(json!(null)), json!(null));
    }
}
