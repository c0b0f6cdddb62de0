//! Two-Step Flow
//!
//! The first call only creates the charge and names a companion confirm
//! tool. Calling `confirm_<tool>_payment` with the payment id runs the
//! original tool with the arguments captured in step one.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use paygate_core::{
    Content, CoreError, ErrorCode, ParameterSchema, ProtocolError, Result, ToolContext,
    ToolHandler, ToolRegistration, ToolResult, ToolSchema,
};
use paygate_payments::PaymentStatus;

use super::ledger;
use super::reply::Reply;
use super::{FlowDeps, PricedTool, annotate_paid};

/// Name of the companion confirm tool for `tool`
pub(crate) fn confirm_tool_name(tool: &str) -> String {
    format!("confirm_{}_payment", tool)
}

pub struct TwoStepFlow {
    deps: FlowDeps,
    tool: PricedTool,
    confirm_name: String,
}

impl TwoStepFlow {
    /// Build the flow and register its confirm tool on the host (once per tool name)
    pub fn install(deps: FlowDeps, tool: PricedTool) -> Result<Self> {
        let confirm_name = confirm_tool_name(&tool.name);

        if !deps.host.has_tool(&confirm_name) {
            let schema = ToolSchema::new(
                confirm_name.clone(),
                format!("Confirm payment for '{}' and run it", tool.name),
            )
            .with_parameter(ParameterSchema::required(
                "payment_id",
                "string",
                "Payment identifier returned by the first call",
            ))
            .with_category("payment");

            let handler = Arc::new(ConfirmHandler {
                deps: deps.clone(),
                tool: tool.clone(),
            });
            deps.host.register_tool(ToolRegistration::new(schema, handler))?;
            tracing::debug!(tool = %tool.name, confirm = %confirm_name, "Registered confirm tool");
        }

        Ok(Self {
            deps,
            tool,
            confirm_name,
        })
    }

    pub fn confirm_name(&self) -> &str {
        &self.confirm_name
    }
}

#[async_trait]
impl ToolHandler for TwoStepFlow {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let session = match ledger::open(&self.deps, &self.tool, args).await {
            Ok(session) => session,
            Err(err) => {
                return Err(ProtocolError::new(ErrorCode::ProviderUnreachable, err.to_string()).into());
            }
        };

        ledger::save(&self.deps, &self.deps.payment_key(ctx, &session.payment_id), &session).await?;

        Ok(Reply::pending(format!(
            "Payment required: {}. Pay at {} and then call '{}' with payment_id '{}'.",
            self.tool.price, session.payment_url, self.confirm_name, session.payment_id
        ))
        .reason("payment_required")
        .session(&session)
        .next_step(&self.confirm_name)
        .build())
    }
}

/// Handler behind `confirm_<tool>_payment`
struct ConfirmHandler {
    deps: FlowDeps,
    tool: PricedTool,
}

#[async_trait]
impl ToolHandler for ConfirmHandler {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let payment_id = args
            .get("payment_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CoreError::ToolValidation("payment_id is required".into()))?;

        let key = self.deps.payment_key(ctx, payment_id);
        let _guard = self.deps.store.lock(&key).await;

        let Some(session) = ledger::load(&self.deps, &key).await? else {
            return Err(ProtocolError::new(
                ErrorCode::UnknownOrExpiredPaymentId,
                format!("Unknown or expired payment id '{}'", payment_id),
            )
            .into());
        };

        let raw = self
            .deps
            .provider
            .get_payment_status(payment_id)
            .await
            .map_err(|err| ProtocolError::new(ErrorCode::ProviderUnreachable, err.to_string()))?;

        if !PaymentStatus::normalize(Some(&raw)).is_paid() {
            return Err(ProtocolError::new(
                ErrorCode::PaymentNotPaid,
                format!("Payment status is {}, expected paid", raw),
            )
            .with_data(serde_json::json!({
                "payment_id": payment_id,
                "payment_url": session.payment_url,
                "status": raw,
            }))
            .into());
        }

        let mut result = self.tool.handler.call(session.tool_args, ctx).await?;
        self.deps.store.delete(&key).await?;

        if !result.has_content() {
            result
                .content
                .push(Content::text(format!("Tool '{}' completed.", self.tool.name)));
        }

        tracing::info!(tool = %self.tool.name, payment_id = %payment_id, "Confirmed payment and ran tool");
        Ok(annotate_paid(result, payment_id))
    }
}
