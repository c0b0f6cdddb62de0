//! Application State

use std::sync::Arc;

use paygate_core::MemoryToolHost;
use paygate_flows::FlowKind;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Host holding the gated tools and their per-session visibility
    pub host: Arc<MemoryToolHost>,

    /// Payment flow every paid tool goes through
    pub flow: FlowKind,

    /// Name of the payment provider in use
    pub provider: String,
}
