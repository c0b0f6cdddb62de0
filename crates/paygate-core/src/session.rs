//! Session Identity
//!
//! Host session identifiers and the composite keys used to scope pending
//! payments to the caller that created them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique host session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who a pending payment belongs to.
///
/// A host session is the strongest identity available. Without one, records
/// are only namespaced by provider and must be addressed by payment id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyScope {
    Session(SessionId),
    Provider(String),
}

impl KeyScope {
    pub fn new(provider: &str, session: Option<&SessionId>) -> Self {
        match session {
            Some(id) => KeyScope::Session(id.clone()),
            None => KeyScope::Provider(provider.to_string()),
        }
    }
}

impl std::fmt::Display for KeyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyScope::Session(id) => write!(f, "session:{}", id),
            KeyScope::Provider(name) => write!(f, "provider:{}", name),
        }
    }
}

/// Composite state-store key for a pending payment
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    scope: KeyScope,
    item: String,
}

impl SessionKey {
    /// Key for a payment record: `(session|provider, payment_id)`
    pub fn payment(provider: &str, session: Option<&SessionId>, payment_id: &str) -> Self {
        Self {
            scope: KeyScope::new(provider, session),
            item: format!("payment:{}", payment_id),
        }
    }

    /// Caller-scoped pointer to the newest pending payment for a tool.
    ///
    /// Only exists when the host identified the caller; anonymous callers
    /// never share a pointer.
    pub fn pending_for_tool(session: Option<&SessionId>, tool: &str) -> Option<Self> {
        session.map(|id| Self {
            scope: KeyScope::Session(id.clone()),
            item: format!("tool:{}", tool),
        })
    }

    pub fn scope(&self) -> &KeyScope {
        &self.scope
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.scope, self.item)
    }
}
