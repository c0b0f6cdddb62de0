//! Flow Registry
//!
//! Maps a flow name to the constructor of its gated handler.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use paygate_core::{ParameterSchema, ToolHandler, ToolSchema};

use crate::error::{FlowError, Result};
use crate::flow::{
    AutoFlow, ElicitationFlow, FlowDeps, ListChangeFlow, PricedTool, ProgressFlow, ResubmitFlow,
    TwoStepFlow,
};

/// Available payment confirmation flows
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Elicitation,
    Progress,
    TwoStep,
    Resubmit,
    ListChange,
    Auto,
}

impl FlowKind {
    pub const ALL: [FlowKind; 6] = [
        FlowKind::Elicitation,
        FlowKind::Progress,
        FlowKind::TwoStep,
        FlowKind::Resubmit,
        FlowKind::ListChange,
        FlowKind::Auto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::Elicitation => "elicitation",
            FlowKind::Progress => "progress",
            FlowKind::TwoStep => "two_step",
            FlowKind::Resubmit => "resubmit",
            FlowKind::ListChange => "list_change",
            FlowKind::Auto => "auto",
        }
    }

    /// Whether callers resend the call with a `payment_id` argument
    pub fn accepts_payment_id(&self) -> bool {
        matches!(self, FlowKind::Resubmit | FlowKind::Auto)
    }

    /// Build the gated handler for `tool`
    pub fn build(self, deps: &FlowDeps, tool: PricedTool) -> Result<Arc<dyn ToolHandler>> {
        let deps = deps.clone();
        let handler: Arc<dyn ToolHandler> = match self {
            FlowKind::Elicitation => Arc::new(ElicitationFlow::new(deps, tool)),
            FlowKind::Progress => Arc::new(ProgressFlow::new(deps, tool)),
            FlowKind::TwoStep => Arc::new(TwoStepFlow::install(deps, tool)?),
            FlowKind::Resubmit => Arc::new(ResubmitFlow::new(deps, tool)),
            FlowKind::ListChange => Arc::new(ListChangeFlow::new(deps, tool)),
            FlowKind::Auto => Arc::new(AutoFlow::new(deps, tool)),
        };
        Ok(handler)
    }

    /// Schema callers see for a tool gated by this flow
    pub fn decorate(&self, schema: ToolSchema, tool: &PricedTool) -> ToolSchema {
        let mut schema = schema;
        schema.description = format!(
            "{}\nThis is a paid tool: {} per call.",
            schema.description.trim_end(),
            tool.price
        );
        if self.accepts_payment_id() {
            schema = schema.with_parameter(ParameterSchema::optional(
                "payment_id",
                "string",
                "Payment identifier returned by a previous payment_required error",
            ));
        }
        schema
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        FlowKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| FlowError::UnknownFlow(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Fixture;
    use paygate_payments::MockProvider;

    #[test]
    fn test_parse_flow_names() {
        for kind in FlowKind::ALL {
            assert_eq!(kind.as_str().parse::<FlowKind>().unwrap(), kind);
        }
        assert_eq!("Two-Step".parse::<FlowKind>().unwrap(), FlowKind::TwoStep);
        assert!(matches!("x402".parse::<FlowKind>(), Err(FlowError::UnknownFlow(_))));
    }

    #[test]
    fn test_decorated_schema() {
        let fixture = Fixture::new(MockProvider::new());
        let schema = ToolSchema::new("report", "Writes a report")
            .with_parameter(ParameterSchema::required("topic", "string", "Topic"));

        let resubmit = FlowKind::Resubmit.decorate(schema.clone(), &fixture.tool());
        assert!(resubmit.description.ends_with("0.50 USD per call."));
        assert!(resubmit.parameters.iter().any(|p| p.name == "payment_id" && !p.required));

        let progress = FlowKind::Progress.decorate(schema, &fixture.tool());
        assert!(progress.parameters.iter().all(|p| p.name != "payment_id"));
    }

    #[tokio::test]
    async fn test_every_flow_builds() {
        let fixture = Fixture::new(MockProvider::new());
        for kind in FlowKind::ALL {
            assert!(kind.build(&fixture.deps, fixture.tool()).is_ok(), "{}", kind);
        }
    }
}
