//! Resubmit Flow
//!
//! The first call fails with a `payment_required` protocol error carrying
//! the payment link. The caller pays and repeats the call with `payment_id`;
//! that call runs the tool exactly once under the payment's lock.

use async_trait::async_trait;
use serde_json::{Value, json};

use paygate_core::{
    ErrorCode, ProtocolError, Result, ToolContext, ToolHandler, ToolResult,
};
use paygate_payments::{PaymentError, PaymentStatus};

use super::ledger;
use super::reply::Reply;
use super::{FlowDeps, PricedTool, annotate_paid, strip_payment_id};

pub struct ResubmitFlow {
    deps: FlowDeps,
    tool: PricedTool,
}

impl ResubmitFlow {
    pub fn new(deps: FlowDeps, tool: PricedTool) -> Self {
        Self { deps, tool }
    }

    async fn require_payment(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let session = ledger::open(&self.deps, &self.tool, args)
            .await
            .map_err(|err| ProtocolError::new(ErrorCode::ProviderUnreachable, err.to_string()))?;

        ledger::save(&self.deps, &self.deps.payment_key(ctx, &session.payment_id), &session).await?;

        Err(ProtocolError::new(
            ErrorCode::PaymentRequired,
            format!("Payment required: {}. Pay at {}", self.tool.price, session.payment_url),
        )
        .with_data(json!({
            "payment_id": session.payment_id,
            "payment_url": session.payment_url,
            "retry_instructions": format!(
                "Complete the payment, then call '{}' again with the same arguments plus payment_id.",
                self.tool.name
            ),
        }))
        .into())
    }

    async fn redeem(&self, payment_id: &str, ctx: &ToolContext) -> Result<ToolResult> {
        let key = self.deps.payment_key(ctx, payment_id);
        let _guard = self.deps.store.lock(&key).await;

        let Some(session) = ledger::load(&self.deps, &key).await? else {
            return Err(ProtocolError::new(
                ErrorCode::PaymentIdNotFound,
                format!("Payment id '{}' not found or already used", payment_id),
            )
            .into());
        };

        let raw = match self.deps.provider.get_payment_status(payment_id).await {
            Ok(raw) => raw,
            Err(err @ PaymentError::UnknownPayment(_)) => {
                return Err(ProtocolError::new(ErrorCode::PaymentUnknown, err.to_string()).into());
            }
            Err(err) => {
                return Err(ProtocolError::new(ErrorCode::ProviderUnreachable, err.to_string())
                    .with_data(json!({ "payment_id": payment_id, "retryable": true }))
                    .into());
            }
        };

        match PaymentStatus::normalize(Some(&raw)) {
            PaymentStatus::Paid => {}
            PaymentStatus::Canceled => {
                self.deps.store.delete(&key).await?;
                return Err(ProtocolError::new(
                    ErrorCode::PaymentCanceled,
                    format!("Payment was {}. Call '{}' again without payment_id to start over.", raw, self.tool.name),
                )
                .with_data(json!({ "payment_id": payment_id, "retryable": true }))
                .into());
            }
            PaymentStatus::Pending if !PaymentStatus::is_recognized(&raw) => {
                return Err(ProtocolError::new(
                    ErrorCode::PaymentUnknown,
                    format!("Payment is in an unrecognized state '{}'", raw),
                )
                .with_data(json!({ "payment_id": payment_id, "status": raw }))
                .into());
            }
            PaymentStatus::Pending => {
                return Err(ProtocolError::new(
                    ErrorCode::PaymentPending,
                    format!("Payment not completed yet. Pay at {}", session.payment_url),
                )
                .with_data(json!({
                    "payment_id": payment_id,
                    "payment_url": session.payment_url,
                }))
                .into());
            }
        }

        let result = self.tool.handler.call(session.tool_args, ctx).await?;

        if ctx.abort.is_aborted() {
            tracing::info!(payment_id = %payment_id, "Caller left before the result was delivered");
            return Ok(Reply::pending("Payment received but the call was interrupted. Call the tool again with the same payment_id.")
                .payment(payment_id, Some(&session.payment_url))
                .build());
        }

        self.deps.store.delete(&key).await?;
        tracing::info!(tool = %self.tool.name, payment_id = %payment_id, "Redeemed payment");
        Ok(annotate_paid(result, payment_id))
    }
}

#[async_trait]
impl ToolHandler for ResubmitFlow {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let payment_id = args
            .get("payment_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        match payment_id {
            Some(payment_id) => self.redeem(&payment_id, ctx).await,
            None => self.require_payment(strip_payment_id(args), ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Fixture;
    use paygate_core::{AbortSignal, CoreError, PaymentState, SessionId};
    use paygate_payments::MockProvider;
    use std::sync::Arc;

    fn code(outcome: &Result<ToolResult>) -> ErrorCode {
        match outcome {
            Err(err) => err.as_protocol().map(|p| p.code).unwrap(),
            Ok(_) => panic!("expected a protocol error"),
        }
    }

    #[tokio::test]
    async fn test_full_resubmit_lifecycle() {
        let fixture = Fixture::new(MockProvider::new().with_payment_ids(&["p1"]));
        let flow = ResubmitFlow::new(fixture.deps.clone(), fixture.tool());
        let ctx = ToolContext::new();

        let required = flow.call(json!({"topic": "rust"}), &ctx).await;
        assert_eq!(code(&required), ErrorCode::PaymentRequired);
        let data = required.unwrap_err().as_protocol().unwrap().data.clone();
        assert_eq!(data["payment_id"], "p1");
        assert!(data["retry_instructions"].is_string());

        let pending = flow.call(json!({"topic": "rust", "payment_id": "p1"}), &ctx).await;
        assert_eq!(code(&pending), ErrorCode::PaymentPending);

        fixture.provider.set_status("p1", "paid").await;
        let paid = flow.call(json!({"topic": "rust", "payment_id": "p1"}), &ctx).await.unwrap();
        assert!(paid.success);
        assert_eq!(paid.payment.unwrap().status, PaymentState::Paid);
        assert_eq!(fixture.calls(), 1);

        let replay = flow.call(json!({"topic": "rust", "payment_id": "p1"}), &ctx).await;
        assert_eq!(code(&replay), ErrorCode::PaymentIdNotFound);
        assert_eq!(fixture.calls(), 1);
    }

    #[tokio::test]
    async fn test_stored_args_win_over_resubmitted() {
        let fixture = Fixture::new(MockProvider::paid_after(0).with_payment_ids(&["p1"]));
        let flow = ResubmitFlow::new(fixture.deps.clone(), fixture.tool());

        let _ = flow.call(json!({"topic": "rust"}), &ToolContext::new()).await;
        let paid = flow
            .call(json!({"topic": "go", "payment_id": "p1"}), &ToolContext::new())
            .await
            .unwrap();
        assert!(paid.text().contains("rust"));
        assert!(!paid.text().contains("payment_id"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resubmits_execute_once() {
        let fixture = Fixture::new(MockProvider::paid_after(0).with_payment_ids(&["p1"]));
        let flow = Arc::new(ResubmitFlow::new(fixture.deps.clone(), fixture.tool()));
        let _ = flow.call(json!({"topic": "rust"}), &ToolContext::new()).await;

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let flow = Arc::clone(&flow);
            tasks.push(tokio::spawn(async move {
                flow.call(json!({"topic": "rust", "payment_id": "p1"}), &ToolContext::new())
                    .await
            }));
        }

        let mut successes = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(result) if result.success => successes += 1,
                Ok(_) => {}
                Err(err) => assert_eq!(
                    err.as_protocol().map(|p| p.code),
                    Some(ErrorCode::PaymentIdNotFound)
                ),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(fixture.calls(), 1);
        assert_eq!(fixture.store.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_preserves_payment() {
        let fixture = Fixture::new(MockProvider::paid_after(0).with_payment_ids(&["p1"])).failing_once();
        let flow = ResubmitFlow::new(fixture.deps.clone(), fixture.tool());
        let _ = flow.call(json!({"topic": "rust"}), &ToolContext::new()).await;

        let failed = flow
            .call(json!({"topic": "rust", "payment_id": "p1"}), &ToolContext::new())
            .await;
        assert!(matches!(failed, Err(CoreError::ToolExecution(_))));

        let retried = flow
            .call(json!({"topic": "rust", "payment_id": "p1"}), &ToolContext::new())
            .await
            .unwrap();
        assert!(retried.success);
        assert_eq!(fixture.provider.created_count(), 1);
    }

    #[tokio::test]
    async fn test_sessions_cannot_redeem_each_other() {
        let fixture = Fixture::new(MockProvider::paid_after(0).with_payment_ids(&["p1"]));
        let flow = ResubmitFlow::new(fixture.deps.clone(), fixture.tool());
        let alice = ToolContext::new().with_session(SessionId::from_string("alice"));
        let bob = ToolContext::new().with_session(SessionId::from_string("bob"));

        let _ = flow.call(json!({"topic": "rust"}), &alice).await;

        let stolen = flow.call(json!({"topic": "rust", "payment_id": "p1"}), &bob).await;
        assert_eq!(code(&stolen), ErrorCode::PaymentIdNotFound);
        assert_eq!(fixture.calls(), 0);

        let own = flow.call(json!({"topic": "rust", "payment_id": "p1"}), &alice).await;
        assert!(own.unwrap().success);
    }

    #[tokio::test]
    async fn test_canceled_and_unknown_statuses() {
        let fixture = Fixture::new(MockProvider::new().with_payment_ids(&["p1", "p2"]));
        let flow = ResubmitFlow::new(fixture.deps.clone(), fixture.tool());
        let ctx = ToolContext::new();

        let _ = flow.call(json!({"topic": "rust"}), &ctx).await;
        fixture.provider.set_status("p1", "expired").await;
        let canceled = flow.call(json!({"payment_id": "p1"}), &ctx).await;
        assert_eq!(code(&canceled), ErrorCode::PaymentCanceled);
        assert!(canceled.unwrap_err().is_retryable());

        let _ = flow.call(json!({"topic": "rust"}), &ctx).await;
        fixture.provider.set_status("p2", "on_hold").await;
        let unknown = flow.call(json!({"payment_id": "p2"}), &ctx).await;
        assert_eq!(code(&unknown), ErrorCode::PaymentUnknown);
    }

    #[tokio::test]
    async fn test_abort_after_success_keeps_record() {
        let fixture = Fixture::new(MockProvider::paid_after(0).with_payment_ids(&["p1"]));
        let flow = ResubmitFlow::new(fixture.deps.clone(), fixture.tool());
        let _ = flow.call(json!({"topic": "rust"}), &ToolContext::new()).await;

        let (handle, signal) = AbortSignal::pair();
        handle.abort();
        let interrupted = flow
            .call(json!({"payment_id": "p1"}), &ToolContext::new().with_abort(signal))
            .await
            .unwrap();
        assert_eq!(interrupted.payment.unwrap().status, PaymentState::Pending);
        assert_eq!(fixture.store.len(), 1);

        let delivered = flow.call(json!({"payment_id": "p1"}), &ToolContext::new()).await.unwrap();
        assert!(delivered.success);
    }

    #[tokio::test]
    async fn test_provider_down_on_first_call() {
        let fixture = Fixture::new(MockProvider::new());
        fixture.provider.set_create_failure(true);
        let flow = ResubmitFlow::new(fixture.deps.clone(), fixture.tool());

        let outcome = flow.call(json!({"topic": "rust"}), &ToolContext::new()).await;
        assert_eq!(code(&outcome), ErrorCode::ProviderUnreachable);
        assert!(fixture.store.is_empty());
    }
}
