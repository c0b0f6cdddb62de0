//! Auto Flow
//!
//! Picks per call: elicitation when the caller can answer prompts,
//! resubmit otherwise.

use async_trait::async_trait;
use serde_json::Value;

use paygate_core::{Result, ToolContext, ToolHandler, ToolResult};

use super::{ElicitationFlow, FlowDeps, PricedTool, ResubmitFlow};

pub struct AutoFlow {
    deps: FlowDeps,
    elicitation: ElicitationFlow,
    resubmit: ResubmitFlow,
}

impl AutoFlow {
    pub fn new(deps: FlowDeps, tool: PricedTool) -> Self {
        Self {
            elicitation: ElicitationFlow::new(deps.clone(), tool.clone()),
            resubmit: ResubmitFlow::new(deps.clone(), tool),
            deps,
        }
    }
}

#[async_trait]
impl ToolHandler for AutoFlow {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let resubmitting = args.get("payment_id").is_some_and(|id| !id.is_null());

        if !resubmitting && self.deps.host.supports_elicitation(ctx) {
            self.elicitation.call(super::strip_payment_id(args), ctx).await
        } else {
            self.resubmit.call(args, ctx).await
        }
    }
}
