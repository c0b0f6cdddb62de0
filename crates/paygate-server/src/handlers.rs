//! HTTP Handlers

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use paygate_core::{CoreError, Notification, SessionId, ToolContext, ToolResult};

use crate::state::AppState;

/// Header carrying the caller's session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Header carrying the progress token for long-running calls
pub const PROGRESS_HEADER: &str = "x-progress-token";

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub flow: String,
    pub provider: String,
    pub tools: usize,
}

#[derive(Debug, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub progress_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

// ============================================================================
// Errors
// ============================================================================

/// Tool-call failure rendered as `{ "error": { code, message, data } }`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Core(err) = self;

        let (status, body) = match &err {
            CoreError::Protocol(protocol) => (
                StatusCode::from_u16(protocol.code.http_status()).unwrap_or(StatusCode::PAYMENT_REQUIRED),
                ErrorBody {
                    code: protocol.code.as_str().into(),
                    message: protocol.message.clone(),
                    data: protocol.data.clone(),
                },
            ),
            CoreError::ToolNotFound(_) => (StatusCode::NOT_FOUND, body("tool_not_found", &err)),
            CoreError::ToolValidation(_) => (StatusCode::BAD_REQUEST, body("invalid_params", &err)),
            CoreError::MethodNotFound(_) => (StatusCode::NOT_IMPLEMENTED, body("method_not_found", &err)),
            _ => {
                tracing::error!(error = %err, "Tool call failed");
                (StatusCode::INTERNAL_SERVER_ERROR, body("internal_error", &err))
            }
        };

        (status, Json(ErrorResponse { error: body })).into_response()
    }
}

fn body(code: &str, err: &CoreError) -> ErrorBody {
    ErrorBody {
        code: code.into(),
        message: err.user_message(),
        data: serde_json::Value::Null,
    }
}

fn session(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(SessionId::from_string)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        flow: state.flow.to_string(),
        provider: state.provider.clone(),
        tools: state.host.len(),
    })
}

/// Tools visible to the calling session
pub async fn list_tools(State(state): State<AppState>, headers: HeaderMap) -> Json<Vec<ToolDescription>> {
    let session = session(&headers);
    let tools = state
        .host
        .list_tools(session.as_ref())
        .into_iter()
        .map(|schema| ToolDescription {
            input_schema: schema.input_schema(),
            name: schema.name,
            description: schema.description,
        })
        .collect();
    Json(tools)
}

/// Invoke a tool as the calling session
pub async fn call_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CallRequest>,
) -> Result<Json<ToolResult>, ApiError> {
    let mut ctx = ToolContext::new();
    if let Some(id) = session(&headers) {
        ctx = ctx.with_session(id);
    }
    if let Some(token) = headers.get(PROGRESS_HEADER).and_then(|v| v.to_str().ok()) {
        ctx = ctx.with_progress_token(token);
    }

    let arguments = match request.arguments {
        serde_json::Value::Null => serde_json::json!({}),
        other => other,
    };

    tracing::info!(tool = %request.name, request_id = %ctx.request_id, "Tool call");
    let result = state.host.call(&request.name, arguments, &ctx).await?;
    Ok(Json(result))
}

/// Notifications addressed to the calling session (or progress token)
pub async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NotificationQuery>,
) -> Json<Vec<Notification>> {
    let session = session(&headers);
    let notifications = state
        .host
        .notifications()
        .into_iter()
        .filter(|n| match n {
            Notification::Progress {
                progress_token,
                session_id,
                ..
            } => match &query.progress_token {
                Some(token) => progress_token.as_ref() == Some(token),
                None => session.is_some() && session_id == &session,
            },
            Notification::ToolListChanged { session_id } => session.is_some() && session_id == &session,
        })
        .collect();
    Json(notifications)
}
