//! paygate HTTP Server
//!
//! Axum-based server exposing payment-gated tools over a small JSON API.
//! Tools are charged through Stripe when `STRIPE_SECRET_KEY` is set and
//! through the scripted mock provider otherwise.

mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use rust_decimal::Decimal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use paygate_core::{
    MemoryStateStore, MemoryToolHost, ParameterSchema, ToolContext, ToolHost, ToolRegistration,
    ToolResult, ToolSchema, handler_fn,
};
use paygate_flows::{FlowDeps, FlowKind, PaygateConfig, Paywall};
use paygate_payments::{MockProvider, PaymentProvider, Price, StripeProvider};

use crate::handlers::{call_tool, health_check, list_notifications, list_tools};
use crate::state::AppState;

/// Stripe when configured, otherwise a mock that settles after a few polls
fn payment_provider() -> Arc<dyn PaymentProvider> {
    match StripeProvider::from_env() {
        Ok(stripe) => {
            tracing::info!("✓ Stripe configured");
            Arc::new(stripe)
        }
        Err(_) => {
            let polls = std::env::var("PAYGATE_MOCK_PAID_AFTER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2);
            tracing::warn!("⚠ Stripe not configured - using mock payments (paid after {} polls)", polls);
            tracing::warn!("  Set STRIPE_SECRET_KEY in .env to charge for real");
            Arc::new(MockProvider::paid_after(polls))
        }
    }
}

fn report_price() -> anyhow::Result<Price> {
    let amount: Decimal = std::env::var("PAYGATE_PRICE")
        .unwrap_or_else(|_| "0.50".into())
        .parse()?;
    let currency = std::env::var("PAYGATE_CURRENCY").unwrap_or_else(|_| "USD".into());
    Ok(Price::new(amount, currency)?)
}

/// Register the demo tools on the host
fn register_tools(paywall: &Paywall, host: &MemoryToolHost, price: Price) -> anyhow::Result<()> {
    let report = ToolSchema::new("premium_report", "Generate a detailed report on a topic")
        .with_parameter(ParameterSchema::required("topic", "string", "Topic of the report"))
        .with_category("reports");

    paywall.register(
        report,
        price,
        handler_fn(|args: serde_json::Value, _ctx: ToolContext| async move {
            let topic = args
                .get("topic")
                .and_then(|v| v.as_str())
                .unwrap_or("anything")
                .to_string();
            Ok(ToolResult::success(format!("Premium report on {}: all indicators look healthy.", topic))
                .with_data(serde_json::json!({ "topic": topic })))
        }),
    )?;

    let ping = ToolSchema::new("ping", "Free connectivity check");
    host.register_tool(ToolRegistration::new(
        ping,
        handler_fn(|_args: serde_json::Value, _ctx: ToolContext| async { Ok(ToolResult::success("pong")) }),
    ))?;
    Ok(())
}

/// Wire host, provider, store and flow together
fn build_state(
    provider: Arc<dyn PaymentProvider>,
    flow: FlowKind,
    config: PaygateConfig,
    price: Price,
) -> anyhow::Result<(AppState, Arc<MemoryStateStore>)> {
    let host = Arc::new(MemoryToolHost::new());
    let store = Arc::new(MemoryStateStore::new());
    let provider_name = provider.name().to_string();

    let deps = FlowDeps::new(host.clone(), provider, store.clone(), config);
    let paywall = Paywall::new(deps, flow);
    register_tools(&paywall, &host, price)?;

    let state = AppState {
        host,
        flow,
        provider: provider_name,
    };
    Ok((state, store))
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/tools", get(list_tools))
        .route("/tools/call", post(call_tool))
        .route("/notifications", get(list_notifications))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = PaygateConfig::from_env()?;
    let flow: FlowKind = std::env::var("PAYGATE_FLOW")
        .unwrap_or_else(|_| FlowKind::Resubmit.to_string())
        .parse()?;

    let (state, store) = build_state(payment_provider(), flow, config.clone(), report_price()?)?;
    let _sweeper = store.spawn_sweeper(config.sweep_interval);

    tracing::info!("Registered {} tools:", state.host.len());
    for name in state.host.names(None) {
        tracing::info!("  • {}", name);
    }

    let app = app(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 paygate server running on http://{} (flow: {})", addr, flow);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health         - Health check");
    tracing::info!("  GET  /tools          - Tools visible to x-session-id");
    tracing::info!("  POST /tools/call     - Call a tool");
    tracing::info!("  GET  /notifications  - Progress and tool-list events");

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_app(flow: FlowKind) -> Router {
        let provider = Arc::new(MockProvider::paid_after(0).with_payment_ids(&["p1"]));
        let price = Price::new(Decimal::new(50, 2), "USD").unwrap();
        let (state, _store) = build_state(provider, flow, PaygateConfig::default(), price).unwrap();
        app(state)
    }

    async fn call(app: &Router, session: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post("/tools/call")
            .header("content-type", "application/json")
            .header(handlers::SESSION_HEADER, session)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_resubmit_over_http() {
        let app = test_app(FlowKind::Resubmit);

        let (status, body) = call(&app, "s1", json!({"name": "premium_report", "arguments": {"topic": "rust"}})).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"]["code"], "payment_required");
        assert_eq!(body["error"]["data"]["payment_id"], "p1");

        let (status, body) = call(
            &app,
            "s1",
            json!({"name": "premium_report", "arguments": {"topic": "rust", "payment_id": "p1"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payment"]["status"], "paid");

        let (status, body) = call(
            &app,
            "s1",
            json!({"name": "premium_report", "arguments": {"topic": "rust", "payment_id": "p1"}}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "payment_id_not_found");
    }

    #[tokio::test]
    async fn test_free_tool_and_unknown_tool() {
        let app = test_app(FlowKind::TwoStep);

        let (status, body) = call(&app, "s1", json!({"name": "ping"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"][0]["text"], "pong");

        let (status, body) = call(&app, "s1", json!({"name": "nope", "arguments": {}})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "tool_not_found");
    }

    #[tokio::test]
    async fn test_tool_list_follows_session() {
        let app = test_app(FlowKind::ListChange);
        let (status, _) = call(&app, "alice", json!({"name": "premium_report", "arguments": {"topic": "rust"}})).await;
        assert_eq!(status, StatusCode::OK);

        let list = |session: &'static str| {
            let app = app.clone();
            async move {
                let request = Request::get("/tools")
                    .header(handlers::SESSION_HEADER, session)
                    .body(Body::empty())
                    .unwrap();
                let response = app.oneshot(request).await.unwrap();
                let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
                let tools: Value = serde_json::from_slice(&bytes).unwrap();
                tools
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|t| t["name"].as_str().unwrap().to_string())
                    .collect::<Vec<_>>()
            }
        };

        assert_eq!(list("alice").await, vec!["confirm_premium_report_p1", "ping"]);
        assert_eq!(list("bob").await, vec!["ping", "premium_report"]);
    }
}
