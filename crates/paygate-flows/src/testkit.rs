//! Test fixtures shared by the flow tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rust_decimal_macros::dec;

use paygate_core::{
    CoreError, ElicitationAction, ElicitationRequest, ElicitationResponse, Elicitor,
    MemoryStateStore, MemoryToolHost, Result, ToolContext, ToolHandler, ToolResult, handler_fn,
};
use paygate_payments::{MockProvider, Price};

use crate::config::PaygateConfig;
use crate::flow::{FlowDeps, PricedTool};

/// Elicitor that replays scripted actions; the last one repeats
pub(crate) struct ScriptedElicitor {
    actions: Mutex<VecDeque<ElicitationAction>>,
    reject: bool,
    prompts: AtomicUsize,
}

impl ScriptedElicitor {
    pub(crate) fn new(actions: &[ElicitationAction]) -> Arc<Self> {
        Arc::new(Self {
            actions: Mutex::new(actions.iter().copied().collect()),
            reject: false,
            prompts: AtomicUsize::new(0),
        })
    }

    /// Behaves like a client without the elicitation method
    pub(crate) fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            actions: Mutex::new(VecDeque::new()),
            reject: true,
            prompts: AtomicUsize::new(0),
        })
    }

    pub(crate) fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Elicitor for ScriptedElicitor {
    async fn respond(&self, _ctx: &ToolContext, _request: &ElicitationRequest) -> Result<ElicitationResponse> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(CoreError::MethodNotFound("elicitation/create".into()));
        }
        let mut actions = self.actions.lock().unwrap_or_else(PoisonError::into_inner);
        let action = if actions.len() > 1 {
            actions.pop_front()
        } else {
            actions.front().copied()
        };
        Ok(ElicitationResponse::new(action.unwrap_or(ElicitationAction::Decline)))
    }
}

/// Host, provider, store and a counting "report" tool wired together
pub(crate) struct Fixture {
    pub host: Arc<MemoryToolHost>,
    pub provider: Arc<MockProvider>,
    pub store: Arc<MemoryStateStore>,
    pub deps: FlowDeps,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<serde_json::Value>>>,
    fail_next: Arc<AtomicBool>,
}

impl Fixture {
    pub(crate) fn new(provider: MockProvider) -> Self {
        Self::build(MemoryToolHost::new(), provider)
    }

    pub(crate) fn with_elicitor(provider: MockProvider, elicitor: Arc<ScriptedElicitor>) -> Self {
        Self::build(MemoryToolHost::with_elicitor(elicitor), provider)
    }

    fn build(host: MemoryToolHost, provider: MockProvider) -> Self {
        let host = Arc::new(host);
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryStateStore::new());
        let deps = FlowDeps::new(
            host.clone(),
            provider.clone(),
            store.clone(),
            PaygateConfig::default(),
        );
        Self {
            host,
            provider,
            store,
            deps,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn with_config(mut self, config: PaygateConfig) -> Self {
        self.deps.config = Arc::new(config);
        self
    }

    /// The next tool execution fails
    pub(crate) fn failing_once(self) -> Self {
        self.fail_next.store(true, Ordering::SeqCst);
        self
    }

    /// Successful tool executions so far
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Arguments of every successful tool execution, in order
    pub(crate) fn seen_args(&self) -> Vec<serde_json::Value> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn price() -> Price {
        Price {
            amount: dec!(0.50),
            currency: "USD".into(),
        }
    }

    pub(crate) fn handler(&self) -> Arc<dyn ToolHandler> {
        let calls = Arc::clone(&self.calls);
        let seen = Arc::clone(&self.seen);
        let fail_next = Arc::clone(&self.fail_next);
        handler_fn(move |args: serde_json::Value, _ctx: ToolContext| {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            let fail = fail_next.swap(false, Ordering::SeqCst);
            async move {
                if fail {
                    return Err(CoreError::ToolExecution("report backend down".into()));
                }
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap_or_else(PoisonError::into_inner).push(args.clone());
                Ok(ToolResult::success(format!("Report on {}", args)))
            }
        })
    }

    pub(crate) fn priced(&self, handler: Arc<dyn ToolHandler>) -> PricedTool {
        PricedTool::new("report", Self::price(), handler)
    }

    pub(crate) fn tool(&self) -> PricedTool {
        self.priced(self.handler())
    }
}
