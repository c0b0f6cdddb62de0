//! # paygate-core
//!
//! Shared building blocks for payment-gated tools.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ToolHost                              │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ ToolHandler │  │  StateStore │  │     KeyedMutex      │  │
//! │  │  (gated)    │──│  (TTL, KV)  │──│   (FIFO per key)    │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `ToolHost` trait hides the concrete tool server; `MemoryToolHost`
//! is the in-process reference host.

pub mod error;
pub mod lock;
pub mod session;
pub mod state;
pub mod tool;

pub use error::{CoreError, ErrorCode, ProtocolError, Result};
pub use lock::{KeyGuard, KeyedMutex};
pub use session::{KeyScope, SessionId, SessionKey};
pub use state::{MemoryStateStore, StateStore, StoredRecord, with_lock};
pub use tool::{
    AbortHandle, AbortSignal, Content, DEFAULT_NOTIFICATION_CAPACITY, ElicitationAction,
    ElicitationRequest, ElicitationResponse, Elicitor, MemoryToolHost, Notification,
    ParameterSchema, PaymentAnnotation, PaymentState, ToolContext, ToolHandler, ToolHost,
    ToolRegistration, ToolResult, ToolSchema, handler_fn,
};
