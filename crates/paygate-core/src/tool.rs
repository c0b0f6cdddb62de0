//! Tool System
//!
//! Contracts between priced tool handlers and the host that exposes them:
//! handler signature, per-call context, result shape, and the host
//! capabilities the payment flows rely on (registration, per-session
//! visibility, notifications, elicitation).

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::session::SessionId;

// ============================================================================
// Call context
// ============================================================================

/// Cooperative cancellation flag for one tool call
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Create a connected handle/signal pair
    pub fn pair() -> (AbortHandle, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (AbortHandle { tx }, AbortSignal { rx: Some(rx) })
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Trigger side of an [`AbortSignal`]
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// Per-call context supplied by the host
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Host session of the caller, when the transport has one
    pub session_id: Option<SessionId>,

    /// Request identifier (for logs)
    pub request_id: String,

    /// Token to attach to progress notifications
    pub progress_token: Option<String>,

    /// Fires when the caller went away
    pub abort: AbortSignal,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolContext {
    pub fn new() -> Self {
        Self {
            session_id: None,
            request_id: Uuid::new_v4().to_string(),
            progress_token: None,
            abort: AbortSignal::never(),
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_progress_token(mut self, token: impl Into<String>) -> Self {
        self.progress_token = Some(token.into());
        self
    }

    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// A content block in a tool result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

/// Payment status reported alongside a result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Paid,
    Pending,
    Canceled,
    Unsupported,
    Error,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Paid => "paid",
            PaymentState::Pending => "pending",
            PaymentState::Canceled => "canceled",
            PaymentState::Unsupported => "unsupported",
            PaymentState::Error => "error",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment metadata attached to any result that involved a charge
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentAnnotation {
    pub status: PaymentState,
    pub payment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_url: Option<String>,
}

/// Result from tool execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether execution succeeded
    pub success: bool,

    /// Content blocks shown to the caller
    #[serde(default)]
    pub content: Vec<Content>,

    /// Structured data (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Payment annotation (if a charge was involved)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentAnnotation>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            content: vec![Content::text(output)],
            data: None,
            payment: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: vec![Content::text(error)],
            data: None,
            payment: None,
        }
    }

    /// A successful result without any content blocks
    pub fn empty() -> Self {
        Self {
            success: true,
            content: Vec::new(),
            data: None,
            payment: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_payment(mut self, payment: PaymentAnnotation) -> Self {
        self.payment = Some(payment);
        self
    }

    /// Whether the result carries at least one content block
    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }

    /// All text blocks joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                Content::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Schemas
// ============================================================================

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Tool definition schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,

    /// Category for grouping
    #[serde(default)]
    pub category: Option<String>,

    /// Whether tool has side effects
    #[serde(default)]
    pub has_side_effects: bool,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            category: None,
            has_side_effects: false,
        }
    }

    pub fn with_parameter(mut self, parameter: ParameterSchema) -> Self {
        self.parameters.retain(|p| p.name != parameter.name);
        self.parameters.push(parameter);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// JSON Schema for the tool's input object
    pub fn input_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::json!({ "type": p.param_type, "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate arguments before execution
    pub fn validate(&self, args: &serde_json::Value) -> Result<()> {
        for param in self.parameters.iter().filter(|p| p.required) {
            if args.get(&param.name).is_none_or(serde_json::Value::is_null) {
                return Err(CoreError::ToolValidation(format!(
                    "Missing required parameter: {}",
                    param.name
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler trait - implement to expose a capability as a tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with given arguments
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult>;
}

/// Adapts an async closure into a [`ToolHandler`]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(serde_json::Value, ToolContext) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync,
{
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult> {
        (self.f)(args, ctx.clone()).await
    }
}

/// Wrap an async closure as a shareable handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolResult>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: move |args: serde_json::Value, ctx: ToolContext| -> BoxFuture<'static, Result<ToolResult>> {
            Box::pin(f(args, ctx))
        },
    })
}

// ============================================================================
// Host contract
// ============================================================================

/// A tool to be registered on a host
#[derive(Clone)]
pub struct ToolRegistration {
    pub schema: ToolSchema,
    pub handler: Arc<dyn ToolHandler>,

    /// Restrict visibility to one session (None = every session)
    pub session: Option<SessionId>,
}

impl ToolRegistration {
    pub fn new(schema: ToolSchema, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            schema,
            handler,
            session: None,
        }
    }

    pub fn for_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

/// Host notifications emitted by the flows
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Progress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        progress: f64,
        total: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    ToolListChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
}

/// User reply to an elicitation request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElicitationAction {
    Accept,
    Decline,
    Cancel,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElicitationRequest {
    pub message: String,
    #[serde(default)]
    pub requested_schema: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElicitationResponse {
    pub action: ElicitationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
}

impl ElicitationResponse {
    pub fn new(action: ElicitationAction) -> Self {
        Self { action, content: None }
    }
}

/// The surrounding tool server, as seen by the payment flows
#[async_trait]
pub trait ToolHost: Send + Sync {
    /// Register a tool; fails if the name is taken
    fn register_tool(&self, registration: ToolRegistration) -> Result<()>;

    /// Remove a tool; returns whether it existed
    fn unregister_tool(&self, name: &str) -> bool;

    /// Whether a tool is registered under `name`
    fn has_tool(&self, name: &str) -> bool;

    /// Show or hide a tool for one session; returns the previous visibility
    fn set_tool_visibility(&self, session: &SessionId, name: &str, visible: bool) -> Result<bool>;

    /// Deliver a notification to the caller(s)
    async fn notify(&self, notification: Notification) -> Result<()>;

    /// Whether the caller behind `ctx` can answer elicitation requests
    fn supports_elicitation(&self, ctx: &ToolContext) -> bool;

    /// Ask the caller for input
    async fn elicit(&self, ctx: &ToolContext, request: ElicitationRequest) -> Result<ElicitationResponse>;
}

/// Answers elicitation requests on behalf of a [`MemoryToolHost`] caller
#[async_trait]
pub trait Elicitor: Send + Sync {
    async fn respond(&self, ctx: &ToolContext, request: &ElicitationRequest) -> Result<ElicitationResponse>;
}

// ============================================================================
// In-memory host
// ============================================================================

struct RegisteredTool {
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
    session: Option<SessionId>,
}

/// Notifications kept by [`MemoryToolHost`] before the oldest are dropped
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// In-memory tool host (reference host for tests and the HTTP server)
pub struct MemoryToolHost {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    hidden: RwLock<HashMap<SessionId, HashSet<String>>>,
    notifications: Mutex<VecDeque<Notification>>,
    notification_capacity: usize,
    elicitor: Option<Arc<dyn Elicitor>>,
}

impl Default for MemoryToolHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryToolHost {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            hidden: RwLock::new(HashMap::new()),
            notifications: Mutex::new(VecDeque::new()),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            elicitor: None,
        }
    }

    /// Keep at most `capacity` notifications (at least one)
    pub fn with_notification_capacity(mut self, capacity: usize) -> Self {
        self.notification_capacity = capacity.max(1);
        self
    }

    /// Host whose callers answer elicitation through `elicitor`
    pub fn with_elicitor(elicitor: Arc<dyn Elicitor>) -> Self {
        Self {
            elicitor: Some(elicitor),
            ..Self::new()
        }
    }

    fn is_visible(&self, tool: &RegisteredTool, session: Option<&SessionId>) -> bool {
        if let Some(owner) = &tool.session {
            if session != Some(owner) {
                return false;
            }
        }
        match session {
            Some(id) => !self
                .hidden
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .is_some_and(|hidden| hidden.contains(&tool.schema.name)),
            None => true,
        }
    }

    /// Execute a tool call as the caller behind `ctx`
    pub async fn call(&self, name: &str, args: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult> {
        let (schema, handler) = {
            let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
            let tool = tools
                .get(name)
                .filter(|tool| self.is_visible(tool, ctx.session_id.as_ref()))
                .ok_or_else(|| CoreError::ToolNotFound(name.to_string()))?;
            (tool.schema.clone(), Arc::clone(&tool.handler))
        };

        schema.validate(&args)?;

        tracing::debug!(tool = %name, request_id = %ctx.request_id, "Dispatching tool call");
        handler.call(args, ctx).await
    }

    /// Tools visible to `session`, sorted by name
    pub fn list_tools(&self, session: Option<&SessionId>) -> Vec<ToolSchema> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        let mut schemas: Vec<ToolSchema> = tools
            .values()
            .filter(|tool| self.is_visible(tool, session))
            .map(|tool| tool.schema.clone())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Tool names visible to `session`
    pub fn names(&self, session: Option<&SessionId>) -> Vec<String> {
        self.list_tools(session).into_iter().map(|s| s.name).collect()
    }

    /// Most recent notifications, oldest first
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ToolHost for MemoryToolHost {
    fn register_tool(&self, registration: ToolRegistration) -> Result<()> {
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let name = registration.schema.name.clone();
        if tools.contains_key(&name) {
            return Err(CoreError::ToolExists(name));
        }
        tools.insert(
            name,
            RegisteredTool {
                schema: registration.schema,
                handler: registration.handler,
                session: registration.session,
            },
        );
        Ok(())
    }

    fn unregister_tool(&self, name: &str) -> bool {
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    fn has_tool(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn set_tool_visibility(&self, session: &SessionId, name: &str, visible: bool) -> Result<bool> {
        if !self.has_tool(name) {
            return Err(CoreError::ToolNotFound(name.to_string()));
        }

        let mut hidden = self.hidden.write().unwrap_or_else(PoisonError::into_inner);
        let set = hidden.entry(session.clone()).or_default();
        let was_visible = !set.contains(name);
        if visible {
            set.remove(name);
        } else {
            set.insert(name.to_string());
        }
        if set.is_empty() {
            hidden.remove(session);
        }
        Ok(was_visible)
    }

    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::trace!(?notification, "Host notification");
        let mut log = self.notifications.lock().unwrap_or_else(PoisonError::into_inner);
        while log.len() >= self.notification_capacity {
            log.pop_front();
        }
        log.push_back(notification);
        Ok(())
    }

    fn supports_elicitation(&self, _ctx: &ToolContext) -> bool {
        self.elicitor.is_some()
    }

    async fn elicit(&self, ctx: &ToolContext, request: ElicitationRequest) -> Result<ElicitationResponse> {
        match &self.elicitor {
            Some(elicitor) => elicitor.respond(ctx, &request).await,
            None => Err(CoreError::MethodNotFound("elicitation/create".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo() -> Arc<dyn ToolHandler> {
        handler_fn(|args, _ctx| async move { Ok(ToolResult::success(args.to_string())) })
    }

    fn schema(name: &str) -> ToolSchema {
        ToolSchema::new(name, "test tool")
            .with_parameter(ParameterSchema::required("topic", "string", "What to report on"))
    }

    #[tokio::test]
    async fn test_register_and_call() {
        let host = MemoryToolHost::new();
        host.register_tool(ToolRegistration::new(schema("report"), echo())).unwrap();

        let result = host
            .call("report", json!({"topic": "rust"}), &ToolContext::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.text(), r#"{"topic":"rust"}"#);

        let missing = host.call("report", json!({}), &ToolContext::new()).await;
        assert!(matches!(missing, Err(CoreError::ToolValidation(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let host = MemoryToolHost::new();
        host.register_tool(ToolRegistration::new(schema("report"), echo())).unwrap();
        let again = host.register_tool(ToolRegistration::new(schema("report"), echo()));
        assert!(matches!(again, Err(CoreError::ToolExists(_))));
        assert!(host.unregister_tool("report"));
        assert!(!host.unregister_tool("report"));
        assert!(host.is_empty());
    }

    #[tokio::test]
    async fn test_visibility_is_per_session() {
        let host = MemoryToolHost::new();
        host.register_tool(ToolRegistration::new(schema("report"), echo())).unwrap();
        let a = SessionId::from_string("a");
        let b = SessionId::from_string("b");

        assert!(host.set_tool_visibility(&a, "report", false).unwrap());
        assert!(host.names(Some(&a)).is_empty());
        assert_eq!(host.names(Some(&b)), vec!["report"]);

        let hidden_call = host
            .call("report", json!({"topic": "x"}), &ToolContext::new().with_session(a.clone()))
            .await;
        assert!(matches!(hidden_call, Err(CoreError::ToolNotFound(_))));

        assert!(!host.set_tool_visibility(&a, "report", true).unwrap());
        assert_eq!(host.names(Some(&a)), vec!["report"]);
    }

    #[tokio::test]
    async fn test_session_scoped_registration() {
        let host = MemoryToolHost::new();
        let owner = SessionId::from_string("owner");
        host.register_tool(ToolRegistration::new(schema("confirm"), echo()).for_session(owner.clone()))
            .unwrap();

        assert_eq!(host.names(Some(&owner)), vec!["confirm"]);
        assert!(host.names(Some(&SessionId::from_string("other"))).is_empty());
        assert!(host.names(None).is_empty());
    }

    #[tokio::test]
    async fn test_elicitation_requires_elicitor() {
        let host = MemoryToolHost::new();
        let ctx = ToolContext::new();
        assert!(!host.supports_elicitation(&ctx));

        let request = ElicitationRequest {
            message: "pay?".into(),
            requested_schema: json!({}),
        };
        let result = host.elicit(&ctx, request).await;
        assert!(matches!(result, Err(CoreError::MethodNotFound(_))));
    }

    #[test]
    fn test_unknown_elicitation_action() {
        let response: ElicitationResponse = serde_json::from_value(json!({"action": "later"})).unwrap();
        assert_eq!(response.action, ElicitationAction::Unknown);
    }

    #[test]
    fn test_abort_signal() {
        assert!(!AbortSignal::never().is_aborted());
        let (handle, signal) = AbortSignal::pair();
        assert!(!signal.is_aborted());
        handle.abort();
        assert!(signal.is_aborted());
    }

    #[test]
    fn test_input_schema_lists_required() {
        let schema = schema("report")
            .with_parameter(ParameterSchema::optional("payment_id", "string", "Payment id"));
        let input = schema.input_schema();
        assert_eq!(input["required"], json!(["topic"]));
        assert_eq!(input["properties"]["payment_id"]["type"], "string");
    }

    #[tokio::test]
    async fn test_notification_log_keeps_newest() {
        let host = MemoryToolHost::new().with_notification_capacity(3);
        for i in 0..5_u8 {
            host.notify(Notification::Progress {
                progress_token: Some("t1".into()),
                session_id: None,
                progress: f64::from(i),
                total: 100.0,
                message: None,
            })
            .await
            .unwrap();
        }

        let kept: Vec<f64> = host
            .notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Progress { progress, .. } => Some(progress),
                Notification::ToolListChanged { .. } => None,
            })
            .collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
    }
}
