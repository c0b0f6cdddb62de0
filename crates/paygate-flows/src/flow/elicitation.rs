//! Elicitation Flow
//!
//! Asks the caller, in-band, to pay and confirm. Each prompt round is
//! followed by a status check; the tool runs once the caller accepted and
//! the processor reports the charge as paid.

use async_trait::async_trait;
use serde_json::{Value, json};

use paygate_core::{
    CoreError, ElicitationAction, ElicitationRequest, PaymentState, Result, ToolContext,
    ToolHandler, ToolResult,
};
use paygate_payments::PaymentStatus;

use super::ledger::{self, Acquired, PaymentSession};
use super::reply::Reply;
use super::{FlowDeps, PricedTool, annotate_paid};

/// How the prompt rounds ended
#[derive(Debug)]
enum Negotiation {
    Paid,
    Canceled,
    Pending,
    Unsupported,
    Failed(CoreError),
}

pub struct ElicitationFlow {
    deps: FlowDeps,
    tool: PricedTool,
}

impl ElicitationFlow {
    pub fn new(deps: FlowDeps, tool: PricedTool) -> Self {
        Self { deps, tool }
    }

    fn prompt(&self, session: &PaymentSession) -> ElicitationRequest {
        ElicitationRequest {
            message: format!(
                "Tool '{}' costs {}. Pay at {} and accept once the payment is complete.",
                self.tool.name, self.tool.price, session.payment_url
            ),
            requested_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn negotiate(&self, ctx: &ToolContext, session: &PaymentSession) -> Negotiation {
        let config = &self.deps.config;
        let request = self.prompt(session);
        let mut status = PaymentStatus::Pending;

        for attempt in 1..=config.elicitation_max_attempts {
            if ctx.abort.is_aborted() {
                return Negotiation::Pending;
            }
            if attempt > 1 {
                tokio::time::sleep(config.elicitation_retry_delay).await;
            }

            let response = match self.deps.host.elicit(ctx, request.clone()).await {
                Ok(response) => response,
                Err(CoreError::MethodNotFound(method)) => {
                    tracing::debug!(method = %method, "Caller rejected elicitation");
                    return Negotiation::Unsupported;
                }
                Err(err) => return Negotiation::Failed(err),
            };

            status = match self.deps.provider.status(&session.payment_id).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(payment_id = %session.payment_id, error = %err, "Status check failed");
                    PaymentStatus::Pending
                }
            };

            tracing::debug!(
                tool = %self.tool.name,
                attempt,
                action = ?response.action,
                status = %status,
                "Elicitation round"
            );

            if response.action == ElicitationAction::Cancel || status == PaymentStatus::Canceled {
                return Negotiation::Canceled;
            }
            if response.action == ElicitationAction::Accept && status.is_paid() {
                return Negotiation::Paid;
            }
        }

        if status.is_paid() {
            Negotiation::Paid
        } else {
            Negotiation::Pending
        }
    }

    /// Run the tool on a settled charge; `None` when a concurrent call got there first
    async fn settle(&self, payment_id: &str, args: &Value, ctx: &ToolContext) -> Result<Option<ToolResult>> {
        let Some((_guard, session)) = ledger::claim(&self.deps, ctx, payment_id).await? else {
            return Ok(None);
        };

        match self.tool.handler.call(args.clone(), ctx).await {
            Ok(result) => {
                ledger::forget(&self.deps, ctx, &self.tool.name, &session.payment_id).await;
                Ok(Some(annotate_paid(result, &session.payment_id)))
            }
            Err(err) => {
                tracing::warn!(tool = %self.tool.name, error = %err, "Paid tool failed");
                Ok(Some(
                    Reply::error(
                        "tool_failed",
                        format!("Payment received but the tool failed: {}. Call it again to retry without paying.", err.user_message()),
                    )
                    .session(&session)
                    .build(),
                ))
            }
        }
    }
}

#[async_trait]
impl ToolHandler for ElicitationFlow {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        loop {
            let session = match ledger::reuse_or_create(&self.deps, ctx, &self.tool, &args).await? {
                Acquired::Paid(session) => match self.settle(&session.payment_id, &args, ctx).await? {
                    Some(result) => return Ok(result),
                    None => continue,
                },
                Acquired::Awaiting(session) => session,
                Acquired::Unavailable(err) => return Ok(Reply::provider_unreachable(&err).build()),
            };

            if !self.deps.host.supports_elicitation(ctx) {
                return Ok(Reply::new(
                    PaymentState::Unsupported,
                    format!("Client does not support elicitation. Pay at {} and call the tool again.", session.payment_url),
                )
                .reason("elicitation_not_supported")
                .session(&session)
                .build());
            }

            return match self.negotiate(ctx, &session).await {
                Negotiation::Paid => match self.settle(&session.payment_id, &args, ctx).await? {
                    Some(result) => Ok(result),
                    None => continue,
                },
                Negotiation::Canceled => {
                    ledger::forget(&self.deps, ctx, &self.tool.name, &session.payment_id).await;
                    Ok(Reply::canceled("Payment canceled.").session(&session).build())
                }
                Negotiation::Pending => Ok(Reply::pending(format!(
                    "Payment not completed yet. Pay at {} and call the tool again.",
                    session.payment_url
                ))
                .session(&session)
                .build()),
                Negotiation::Unsupported => {
                    ledger::forget(&self.deps, ctx, &self.tool.name, &session.payment_id).await;
                    Ok(Reply::new(PaymentState::Unsupported, "Client does not support elicitation.")
                        .reason("elicitation_not_supported")
                        .session(&session)
                        .build())
                }
                Negotiation::Failed(err) => {
                    tracing::warn!(tool = %self.tool.name, error = %err, "Elicitation failed");
                    Ok(Reply::error("elicitation_failed", err.user_message())
                        .session(&session)
                        .build())
                }
            };
        }
    }
}
