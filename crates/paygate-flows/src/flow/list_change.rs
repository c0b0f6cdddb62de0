//! List-Change Flow
//!
//! Swaps the tool out of the caller's tool list while a charge is open. The
//! call hides the original tool for the caller's session, registers a
//! single-use `confirm_<tool>_<payment>` tool visible only to that session,
//! and signals a tool-list change. Confirming after payment runs the tool,
//! then restores the original list.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use paygate_core::{
    Notification, Result, SessionId, ToolContext, ToolHandler, ToolRegistration, ToolResult,
    ToolSchema,
};
use paygate_payments::PaymentStatus;

use super::ledger::{self, PaymentSession};
use super::reply::Reply;
use super::{FlowDeps, PricedTool, annotate_paid};

fn is_name_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Confirm-tool name. Ids with characters a tool name cannot carry are
/// reduced to safe ones and tagged with a digest of the raw id.
pub(crate) fn confirm_tool_name(tool: &str, payment_id: &str) -> String {
    if payment_id.chars().all(is_name_safe) {
        return format!("confirm_{}_{}", tool, payment_id);
    }
    let safe: String = payment_id
        .chars()
        .map(|c| if is_name_safe(c) { c } else { '_' })
        .collect();
    let digest = Sha256::digest(payment_id.as_bytes());
    format!("confirm_{}_{}_{}", tool, safe, hex::encode(&digest[..4]))
}

struct HiddenTool {
    /// Visibility before the first pending payment hid it
    was_visible: bool,
    pending: HashSet<String>,
}

/// Which tools are hidden for which session, and why
#[derive(Default)]
struct HiddenTools {
    sessions: Mutex<HashMap<SessionId, HashMap<String, HiddenTool>>>,
}

impl HiddenTools {
    fn hide(&self, deps: &FlowDeps, session: &SessionId, tool: &str, payment_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hidden) = sessions.get_mut(session).and_then(|tools| tools.get_mut(tool)) {
            hidden.pending.insert(payment_id.to_string());
            return Ok(());
        }

        let was_visible = deps.host.set_tool_visibility(session, tool, false)?;
        sessions.entry(session.clone()).or_default().insert(
            tool.to_string(),
            HiddenTool {
                was_visible,
                pending: HashSet::from([payment_id.to_string()]),
            },
        );
        Ok(())
    }

    fn is_pending(&self, session: &SessionId, tool: &str, payment_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .and_then(|tools| tools.get(tool))
            .is_some_and(|hidden| hidden.pending.contains(payment_id))
    }

    /// Forget one pending payment; the tool comes back once none are left
    fn release(&self, deps: &FlowDeps, session: &SessionId, tool: &str, payment_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tools) = sessions.get_mut(session) else {
            return;
        };
        let Some(hidden) = tools.get_mut(tool) else {
            return;
        };

        hidden.pending.remove(payment_id);
        if !hidden.pending.is_empty() {
            return;
        }

        let was_visible = hidden.was_visible;
        tools.remove(tool);
        if tools.is_empty() {
            sessions.remove(session);
        }
        if was_visible {
            if let Err(err) = deps.host.set_tool_visibility(session, tool, true) {
                tracing::warn!(tool = %tool, session = %session, error = %err, "Failed to restore tool");
            }
        }
    }

    #[cfg(test)]
    fn is_hidden(&self, session: &SessionId, tool: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session)
            .is_some_and(|tools| tools.contains_key(tool))
    }

    #[cfg(test)]
    fn tenants(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct ListChangeFlow {
    deps: FlowDeps,
    tool: PricedTool,
    hidden: Arc<HiddenTools>,
}

impl ListChangeFlow {
    pub fn new(deps: FlowDeps, tool: PricedTool) -> Self {
        Self {
            deps,
            tool,
            hidden: Arc::new(HiddenTools::default()),
        }
    }

    fn key(&self, tenant: &SessionId, payment_id: &str) -> String {
        let ctx = ToolContext::new().with_session(tenant.clone());
        self.deps.payment_key(&ctx, payment_id)
    }

    async fn announce(&self, session: &SessionId) {
        let notification = Notification::ToolListChanged {
            session_id: Some(session.clone()),
        };
        if let Err(err) = self.deps.host.notify(notification).await {
            tracing::debug!(error = %err, "Tool list notification dropped");
        }
    }

    /// Hide the tool and expose its confirm tool for `tenant`
    fn swap_in(&self, ctx: &ToolContext, tenant: &SessionId, session: &PaymentSession, confirm_name: &str) -> Result<()> {
        self.hidden.hide(&self.deps, tenant, &self.tool.name, &session.payment_id)?;

        let schema = ToolSchema::new(
            confirm_name.to_string(),
            format!("Confirm payment {} and run '{}'", session.payment_id, self.tool.name),
        )
        .with_category("payment");

        let handler = Arc::new(ConfirmHandler {
            flow: self.clone_shallow(),
            tenant: tenant.clone(),
            payment_id: session.payment_id.clone(),
            confirm_name: confirm_name.to_string(),
        });

        // Anonymous callers get a throwaway tenant; scoping the confirm tool
        // to it would make the tool unreachable.
        let registration = match &ctx.session_id {
            Some(id) => ToolRegistration::new(schema, handler).for_session(id.clone()),
            None => ToolRegistration::new(schema, handler),
        };

        if let Err(err) = self.deps.host.register_tool(registration) {
            self.hidden.release(&self.deps, tenant, &self.tool.name, &session.payment_id);
            return Err(err);
        }
        Ok(())
    }

    fn clone_shallow(&self) -> ListChangeFlow {
        ListChangeFlow {
            deps: self.deps.clone(),
            tool: self.tool.clone(),
            hidden: Arc::clone(&self.hidden),
        }
    }

    /// Undo the swap once the record's TTL has run out without a confirmation.
    /// The task gives up when the flow itself is gone.
    fn expire_later(&self, tenant: SessionId, payment_id: String, confirm_name: String) {
        let hidden = Arc::downgrade(&self.hidden);
        let deps = self.deps.clone();
        let tool = self.tool.clone();

        tokio::spawn(async move {
            tokio::time::sleep(deps.config.state_ttl).await;
            let Some(hidden) = hidden.upgrade() else {
                return;
            };
            let flow = ListChangeFlow { deps, tool, hidden };

            let _guard = flow.deps.store.lock(&flow.key(&tenant, &payment_id)).await;
            if flow.hidden.is_pending(&tenant, &flow.tool.name, &payment_id) {
                tracing::info!(tool = %flow.tool.name, payment_id = %payment_id, "Confirmation window closed");
                flow.swap_out(&tenant, &payment_id, &confirm_name).await;
            }
        });
    }

    /// Undo everything one pending payment set up
    async fn swap_out(&self, tenant: &SessionId, payment_id: &str, confirm_name: &str) {
        if let Err(err) = self.deps.store.delete(&self.key(tenant, payment_id)).await {
            tracing::warn!(payment_id = %payment_id, error = %err, "Failed to clear payment record");
        }
        self.hidden.release(&self.deps, tenant, &self.tool.name, payment_id);
        self.deps.host.unregister_tool(confirm_name);
        self.announce(tenant).await;
    }
}

#[async_trait]
impl ToolHandler for ListChangeFlow {
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let session = match ledger::open(&self.deps, &self.tool, args).await {
            Ok(session) => session,
            Err(err) => return Ok(Reply::provider_unreachable(&err).build()),
        };

        let tenant = ctx.session_id.clone().unwrap_or_default();
        ledger::save(&self.deps, &self.key(&tenant, &session.payment_id), &session).await?;

        let confirm_name = confirm_tool_name(&self.tool.name, &session.payment_id);
        if let Err(err) = self.swap_in(ctx, &tenant, &session, &confirm_name) {
            tracing::warn!(tool = %self.tool.name, error = %err, "Could not swap in confirm tool");
            self.deps.store.delete(&self.key(&tenant, &session.payment_id)).await?;
            return Ok(Reply::error("tool_list_unavailable", err.user_message())
                .session(&session)
                .build());
        }
        self.announce(&tenant).await;
        self.expire_later(tenant, session.payment_id.clone(), confirm_name.clone());

        tracing::info!(
            tool = %self.tool.name,
            payment_id = %session.payment_id,
            confirm = %confirm_name,
            "Tool swapped for confirm tool"
        );

        Ok(Reply::pending(format!(
            "Payment required: {}. Pay at {} and then call '{}'.",
            self.tool.price, session.payment_url, confirm_name
        ))
        .reason("payment_required")
        .session(&session)
        .next_step(confirm_name)
        .build())
    }
}

/// Handler behind one `confirm_<tool>_<payment>` tool
struct ConfirmHandler {
    flow: ListChangeFlow,
    tenant: SessionId,
    payment_id: String,
    confirm_name: String,
}

#[async_trait]
impl ToolHandler for ConfirmHandler {
    async fn call(&self, _args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let flow = &self.flow;
        let key = flow.key(&self.tenant, &self.payment_id);
        let _guard = flow.deps.store.lock(&key).await;

        let Some(session) = ledger::load(&flow.deps, &key).await? else {
            flow.swap_out(&self.tenant, &self.payment_id, &self.confirm_name).await;
            return Ok(Reply::error("unknown_or_expired_payment_id", "This payment is unknown or has expired.")
                .payment(&self.payment_id, None)
                .build());
        };

        let status = match flow.deps.provider.status(&self.payment_id).await {
            Ok(status) => status,
            Err(err) => return Ok(Reply::provider_unreachable(&err).session(&session).build()),
        };

        match status {
            PaymentStatus::Paid => {}
            PaymentStatus::Pending => {
                return Ok(Reply::pending(format!(
                    "Payment not completed yet. Pay at {} and call '{}' again.",
                    session.payment_url, self.confirm_name
                ))
                .session(&session)
                .next_step(&self.confirm_name)
                .build());
            }
            PaymentStatus::Canceled => {
                flow.swap_out(&self.tenant, &self.payment_id, &self.confirm_name).await;
                return Ok(Reply::canceled("Payment canceled.").session(&session).build());
            }
        }

        let outcome = flow.tool.handler.call(session.tool_args.clone(), ctx).await;
        flow.swap_out(&self.tenant, &self.payment_id, &self.confirm_name).await;

        match outcome {
            Ok(result) => Ok(annotate_paid(result, &self.payment_id)),
            Err(err) => {
                tracing::warn!(tool = %flow.tool.name, error = %err, "Paid tool failed");
                Ok(Reply::error("tool_failed", err.user_message())
                    .session(&session)
                    .build())
            }
        }
    }
}
