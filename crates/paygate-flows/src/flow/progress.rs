//! Progress Flow
//!
//! Keeps the call open while the payer pays: the charge is polled on a
//! fixed interval and heartbeat progress notifications carry the payment
//! link to the caller. Progress is capped at 99 until the charge settles.

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use paygate_core::{Notification, Result, ToolContext, ToolHandler, ToolResult};
use paygate_payments::PaymentStatus;

use super::ledger::{self, Acquired, PaymentSession};
use super::reply::Reply;
use super::{FlowDeps, PricedTool, annotate_paid};

pub struct ProgressFlow {
    deps: FlowDeps,
    tool: PricedTool,
}

/// Heartbeat percentage for `elapsed` out of `max_wait`
fn heartbeat(elapsed: std::time::Duration, max_wait: std::time::Duration) -> f64 {
    if max_wait.is_zero() {
        return 99.0;
    }
    (elapsed.as_secs_f64() / max_wait.as_secs_f64() * 99.0).floor().min(99.0)
}

impl ProgressFlow {
    pub fn new(deps: FlowDeps, tool: PricedTool) -> Self {
        Self { deps, tool }
    }

    async fn report(&self, ctx: &ToolContext, progress: f64, message: String) {
        let notification = Notification::Progress {
            progress_token: ctx.progress_token.clone(),
            session_id: ctx.session_id.clone(),
            progress,
            total: 100.0,
            message: Some(message),
        };
        if let Err(err) = self.deps.host.notify(notification).await {
            tracing::debug!(error = %err, "Progress notification dropped");
        }
    }

    /// Run the tool on a settled charge; `None` when a concurrent call got there first
    async fn settle(&self, payment_id: &str, args: &Value, ctx: &ToolContext) -> Result<Option<ToolResult>> {
        let Some((_guard, session)) = ledger::claim(&self.deps, ctx, payment_id).await? else {
            return Ok(None);
        };

        let outcome = self.tool.handler.call(args.clone(), ctx).await;

        if ctx.abort.is_aborted() {
            ledger::forget(&self.deps, ctx, &self.tool.name, &session.payment_id).await;
            tracing::info!(tool = %self.tool.name, payment_id = %session.payment_id, "Caller left after payment");
            return Ok(Some(
                Reply::pending("Payment received but the call was interrupted. Call the tool again.")
                    .session(&session)
                    .build(),
            ));
        }

        let result = match outcome {
            Ok(result) => {
                ledger::forget(&self.deps, ctx, &self.tool.name, &session.payment_id).await;
                annotate_paid(result, &session.payment_id)
            }
            Err(err) => {
                tracing::warn!(tool = %self.tool.name, error = %err, "Paid tool failed");
                Reply::error(
                    "tool_failed",
                    format!("Payment received but the tool failed: {}. Call it again to retry without paying.", err.user_message()),
                )
                .session(&session)
                .build()
            }
        };
        Ok(Some(result))
    }

    /// Poll until the charge settles; `Err` carries the reply that ends the call
    async fn wait_for_payment(&self, session: &PaymentSession, ctx: &ToolContext) -> std::result::Result<(), ToolResult> {
        let config = &self.deps.config;
        self.report(
            ctx,
            0.0,
            format!("Pay {} at {} to run '{}'", self.tool.price, session.payment_url, self.tool.name),
        )
        .await;

        let started = Instant::now();
        while started.elapsed() < config.max_wait {
            if ctx.abort.is_aborted() {
                tracing::info!(payment_id = %session.payment_id, "Caller left while waiting for payment");
                return Err(Reply::pending(format!(
                    "Still waiting for payment at {}. Call the tool again once paid.",
                    session.payment_url
                ))
                .session(session)
                .build());
            }

            tokio::time::sleep(config.poll_interval).await;

            let status = match self.deps.provider.status(&session.payment_id).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(payment_id = %session.payment_id, error = %err, "Status poll failed");
                    PaymentStatus::Pending
                }
            };

            match status {
                PaymentStatus::Paid => {
                    self.report(ctx, 100.0, "Payment received".into()).await;
                    return Ok(());
                }
                PaymentStatus::Canceled => {
                    ledger::forget(&self.deps, ctx, &self.tool.name, &session.payment_id).await;
                    return Err(Reply::canceled("Payment canceled.").session(session).build());
                }
                PaymentStatus::Pending => {
                    let progress = heartbeat(started.elapsed(), config.max_wait);
                    self.report(ctx, progress, format!("Waiting for payment at {}", session.payment_url))
                        .await;
                }
            }
        }

        ledger::forget(&self.deps, ctx, &self.tool.name, &session.payment_id).await;
        tracing::info!(payment_id = %session.payment_id, "Gave up waiting for payment");
        Err(Reply::error("timeout", "Payment was not completed in time.")
            .session(session)
            .build())
    }
}

#[async_trait]
impl ToolHandler for ProgressFlow {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        loop {
            let session = match ledger::reuse_or_create(&self.deps, ctx, &self.tool, &args).await? {
                Acquired::Paid(session) => {
                    self.report(ctx, 100.0, "Payment already received".into()).await;
                    session
                }
                Acquired::Awaiting(session) => {
                    if let Err(reply) = self.wait_for_payment(&session, ctx).await {
                        return Ok(reply);
                    }
                    session
                }
                Acquired::Unavailable(err) => return Ok(Reply::provider_unreachable(&err).build()),
            };

            if let Some(result) = self.settle(&session.payment_id, &args, ctx).await? {
                return Ok(result);
            }
        }
    }
}
