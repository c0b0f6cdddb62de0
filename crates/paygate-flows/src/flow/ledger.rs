//! Pending-payment records
//!
//! A record is stored under `(session|provider, payment_id)`. Flows that
//! reuse charges across calls also keep a per-session pointer from the tool
//! name to its newest payment id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use paygate_core::{KeyGuard, Result, SessionKey, ToolContext};
use paygate_payments::{PaymentError, PaymentStatus};

use super::{FlowDeps, PricedTool};

/// What is remembered about a charge between calls
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub payment_id: String,
    pub payment_url: String,

    /// Arguments of the call that created the charge
    #[serde(default)]
    pub tool_args: Value,

    pub created_at: DateTime<Utc>,

    /// Provider that issued the charge
    pub provider: String,
}

impl PaymentSession {
    fn younger_than(&self, window: std::time::Duration) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        Utc::now().signed_duration_since(self.created_at) < window
    }
}

/// Outcome of looking for a charge a call can use
pub(crate) enum Acquired {
    /// A previous charge for this tool is already settled
    Paid(PaymentSession),

    /// A charge exists (new or reused) and awaits payment
    Awaiting(PaymentSession),

    /// No charge could be created
    Unavailable(PaymentError),
}

/// Create a charge at the processor (nothing is stored)
pub(crate) async fn open(
    deps: &FlowDeps,
    tool: &PricedTool,
    args: Value,
) -> std::result::Result<PaymentSession, PaymentError> {
    let created = deps
        .provider
        .create_payment(tool.price.amount, &tool.price.currency, &tool.charge_description())
        .await?;

    tracing::info!(
        tool = %tool.name,
        payment_id = %created.payment_id,
        provider = %deps.provider.name(),
        "Payment created"
    );

    Ok(PaymentSession {
        payment_id: created.payment_id,
        payment_url: created.payment_url,
        tool_args: args,
        created_at: Utc::now(),
        provider: deps.provider.name().to_string(),
    })
}

/// Persist a record under its payment key
pub(crate) async fn save(deps: &FlowDeps, key: &str, session: &PaymentSession) -> Result<()> {
    deps.store
        .set(key, serde_json::to_value(session)?, Some(deps.config.state_ttl))
        .await
}

/// Read a record; unreadable payloads count as absent
pub(crate) async fn load(deps: &FlowDeps, key: &str) -> Result<Option<PaymentSession>> {
    let Some(record) = deps.store.get(key).await? else {
        return Ok(None);
    };
    match serde_json::from_value(record.args) {
        Ok(session) => Ok(Some(session)),
        Err(err) => {
            tracing::warn!(key = %key, error = %err, "Discarding unreadable payment record");
            deps.store.delete(key).await?;
            Ok(None)
        }
    }
}

/// Lock a settled charge and re-read its record. `None` means another call
/// already ran the tool with it; the guard must be held until `forget`.
pub(crate) async fn claim(
    deps: &FlowDeps,
    ctx: &ToolContext,
    payment_id: &str,
) -> Result<Option<(KeyGuard, PaymentSession)>> {
    let key = deps.payment_key(ctx, payment_id);
    let guard = deps.store.lock(&key).await;
    match load(deps, &key).await? {
        Some(session) => Ok(Some((guard, session))),
        None => {
            tracing::debug!(payment_id = %payment_id, "Payment already consumed by another call");
            Ok(None)
        }
    }
}

/// Record plus tool pointer, for flows that reuse charges
pub(crate) async fn remember(deps: &FlowDeps, ctx: &ToolContext, tool: &str, session: &PaymentSession) -> Result<()> {
    save(deps, &deps.payment_key(ctx, &session.payment_id), session).await?;
    if let Some(pointer) = SessionKey::pending_for_tool(ctx.session_id.as_ref(), tool) {
        deps.store
            .set(
                &pointer.to_string(),
                json!({ "payment_id": session.payment_id }),
                Some(deps.config.state_ttl),
            )
            .await?;
    }
    Ok(())
}

/// Drop a record and the tool pointer (if it still points at it)
pub(crate) async fn forget(deps: &FlowDeps, ctx: &ToolContext, tool: &str, payment_id: &str) {
    if let Err(err) = try_forget(deps, ctx, tool, payment_id).await {
        tracing::warn!(payment_id = %payment_id, error = %err, "Failed to clear payment record");
    }
}

async fn try_forget(deps: &FlowDeps, ctx: &ToolContext, tool: &str, payment_id: &str) -> Result<()> {
    deps.store.delete(&deps.payment_key(ctx, payment_id)).await?;

    if let Some(pointer) = SessionKey::pending_for_tool(ctx.session_id.as_ref(), tool) {
        let pointer = pointer.to_string();
        let current = deps.store.get(&pointer).await?;
        let points_here = current
            .as_ref()
            .and_then(|record| record.args.get("payment_id"))
            .and_then(Value::as_str)
            == Some(payment_id);
        if points_here {
            deps.store.delete(&pointer).await?;
        }
    }
    Ok(())
}

async fn previous(deps: &FlowDeps, ctx: &ToolContext, tool: &str) -> Result<Option<PaymentSession>> {
    let Some(pointer) = SessionKey::pending_for_tool(ctx.session_id.as_ref(), tool) else {
        return Ok(None);
    };
    let pointer = pointer.to_string();
    let Some(record) = deps.store.get(&pointer).await? else {
        return Ok(None);
    };
    let Some(payment_id) = record.args.get("payment_id").and_then(Value::as_str) else {
        deps.store.delete(&pointer).await?;
        return Ok(None);
    };

    let session = load(deps, &deps.payment_key(ctx, payment_id)).await?;
    if session.is_none() {
        deps.store.delete(&pointer).await?;
    }
    Ok(session)
}

/// Reuse this caller's earlier charge for `tool` when it is paid, or still
/// pending and inside the reuse window; otherwise start a new one.
pub(crate) async fn reuse_or_create(
    deps: &FlowDeps,
    ctx: &ToolContext,
    tool: &PricedTool,
    args: &Value,
) -> Result<Acquired> {
    if let Some(session) = previous(deps, ctx, &tool.name).await? {
        match deps.provider.status(&session.payment_id).await {
            Ok(PaymentStatus::Paid) => {
                tracing::info!(tool = %tool.name, payment_id = %session.payment_id, "Reusing paid payment");
                return Ok(Acquired::Paid(session));
            }
            Ok(PaymentStatus::Pending) if session.younger_than(deps.config.reuse_window) => {
                tracing::debug!(tool = %tool.name, payment_id = %session.payment_id, "Reusing pending payment");
                return Ok(Acquired::Awaiting(session));
            }
            Ok(status) => {
                tracing::debug!(payment_id = %session.payment_id, status = %status, "Previous payment not reusable");
            }
            Err(err) => {
                tracing::warn!(payment_id = %session.payment_id, error = %err, "Could not check previous payment");
            }
        }
        forget(deps, ctx, &tool.name, &session.payment_id).await;
    }

    let session = match open(deps, tool, args.clone()).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(tool = %tool.name, error = %err, "Payment creation failed");
            return Ok(Acquired::Unavailable(err));
        }
    };
    remember(deps, ctx, &tool.name, &session).await?;
    Ok(Acquired::Awaiting(session))
}
