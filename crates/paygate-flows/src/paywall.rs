//! Paywall
//!
//! Wraps a tool's schema and handler so every call goes through the
//! configured payment flow.

use std::sync::Arc;

use paygate_core::{ToolHandler, ToolRegistration, ToolSchema};
use paygate_payments::Price;

use crate::error::Result;
use crate::flow::{FlowDeps, PricedTool};
use crate::registry::FlowKind;

/// A tool ready to be registered on a host
#[derive(Clone)]
pub struct GatedTool {
    pub schema: ToolSchema,
    pub handler: Arc<dyn ToolHandler>,
}

impl GatedTool {
    pub fn registration(&self) -> ToolRegistration {
        ToolRegistration::new(self.schema.clone(), Arc::clone(&self.handler))
    }
}

/// Gates priced tools behind one flow
pub struct Paywall {
    deps: FlowDeps,
    kind: FlowKind,
}

impl Paywall {
    pub fn new(deps: FlowDeps, kind: FlowKind) -> Self {
        Self { deps, kind }
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    pub fn deps(&self) -> &FlowDeps {
        &self.deps
    }

    /// Wrap `handler`; calls are charged `price` each
    pub fn wrap(&self, schema: ToolSchema, price: Price, handler: Arc<dyn ToolHandler>) -> Result<GatedTool> {
        let tool = PricedTool::new(schema.name.clone(), price, handler);
        let schema = self.kind.decorate(schema, &tool);
        let handler = self.kind.build(&self.deps, tool)?;
        Ok(GatedTool { schema, handler })
    }

    /// Wrap and register on the host
    pub fn register(&self, schema: ToolSchema, price: Price, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let name = schema.name.clone();
        let gated = self.wrap(schema, price, handler)?;
        self.deps.host.register_tool(gated.registration())?;
        tracing::info!(tool = %name, flow = %self.kind, "Registered paid tool");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Fixture;
    use paygate_core::{CoreError, ErrorCode, ParameterSchema, SessionId, ToolContext};
    use paygate_payments::MockProvider;
    use serde_json::json;

    fn schema() -> ToolSchema {
        ToolSchema::new("report", "Writes a report")
            .with_parameter(ParameterSchema::required("topic", "string", "Topic"))
    }

    #[tokio::test]
    async fn test_resubmit_through_host() {
        let fixture = Fixture::new(MockProvider::paid_after(0).with_payment_ids(&["p1"]));
        let paywall = Paywall::new(fixture.deps.clone(), FlowKind::Resubmit);
        paywall
            .register(schema(), Fixture::price(), fixture.handler())
            .unwrap();

        let ctx = ToolContext::new().with_session(SessionId::from_string("s1"));
        let required = fixture.host.call("report", json!({"topic": "rust"}), &ctx).await;
        let Err(CoreError::Protocol(err)) = required else {
            panic!("expected payment_required");
        };
        assert_eq!(err.code, ErrorCode::PaymentRequired);

        let paid = fixture
            .host
            .call("report", json!({"topic": "rust", "payment_id": "p1"}), &ctx)
            .await
            .unwrap();
        assert!(paid.success);
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test]
    async fn test_two_step_registers_companion() {
        let fixture = Fixture::new(MockProvider::new());
        let paywall = Paywall::new(fixture.deps.clone(), FlowKind::TwoStep);
        paywall
            .register(schema(), Fixture::price(), fixture.handler())
            .unwrap();

        assert_eq!(fixture.host.names(None), vec!["confirm_report_payment", "report"]);
        assert!(paywall.register(schema(), Fixture::price(), fixture.handler()).is_err());
    }
}
