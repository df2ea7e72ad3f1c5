//! Narrow interface between session establishment and the client runtime.
//!
//! Establishment never reaches into the underlying client's internals; it
//! composes over [`ClientRuntime`], which exposes exactly what the handshake
//! needs: a readiness check, property lookup, the base call context, router
//! acquisition, callback-endpoint creation, the ambient context, and the
//! client id. Transport-backed implementations live outside this crate; the
//! scripted one for tests lives in [`crate::testkit`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::service::ServiceRef;

/// Identity under which the local callback endpoint is registered.
///
/// `name` is the client id; `category` comes from the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackIdentity {
    /// Client-chosen endpoint name.
    pub name: String,
    /// Router-assigned category.
    pub category: String,
}

impl std::fmt::Display for CallbackIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

/// Local callback-receiving endpoint created during establishment.
///
/// Implementations own whatever the transport needs (an object adapter, a
/// listener); `deactivate` releases it. All methods may be called from the
/// establishment task only.
pub trait CallbackAdapter: Send + Sync {
    /// Register the callback identity with this endpoint.
    fn register(&self, identity: &CallbackIdentity) -> Result<()>;

    /// Encode a reference to the registered endpoint, suitable as the
    /// argument of the session's `setCallback` operation.
    fn endpoint(&self, identity: &CallbackIdentity) -> Result<serde_json::Value>;

    /// Release the endpoint and everything it holds.
    fn deactivate(&self) -> Result<()>;
}

/// Ambient per-client request context.
///
/// Entries ride along with later operations issued through the same client;
/// establishment publishes the session identifier here.
#[derive(Debug, Default)]
pub struct ImplicitContext {
    entries: Mutex<HashMap<String, String>>,
}

impl ImplicitContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the previous value if any.
    pub fn put(&self, key: &str, value: String) -> Option<String> {
        self.lock().insert(key.to_string(), value)
    }

    /// Look up an entry.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Remove an entry, returning it if present.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.lock().remove(key)
    }

    /// Copy of all current entries.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// What session establishment needs from the underlying client.
pub trait ClientRuntime: Send + Sync {
    /// Verify the runtime can issue calls, recreating its communicator from
    /// prior state if needed. Fails with a configuration error otherwise.
    fn ensure_ready(&self) -> Result<()>;

    /// Look up a configured default property (credential fallbacks).
    fn default_property(&self, key: &str) -> Option<String>;

    /// Base call context for outgoing requests; establishment stamps the
    /// agent and origin entries on top.
    fn call_context(&self) -> HashMap<String, String>;

    /// Obtain the routing proxy used for session acquisition.
    fn router(&self) -> Result<ServiceRef>;

    /// Create a callback-receiving endpoint bound to the given router.
    fn create_callback_adapter(&self, router: &ServiceRef) -> Result<Arc<dyn CallbackAdapter>>;

    /// The ambient request context shared by operations on this client.
    fn implicit_context(&self) -> Arc<ImplicitContext>;

    /// Stable client identifier, used as the callback endpoint name.
    fn client_id(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let identity = CallbackIdentity {
            name: "abc-123".into(),
            category: "_client".into(),
        };
        assert_eq!(identity.to_string(), "_client/abc-123");
    }

    #[test]
    fn test_identity_serializes() {
        let identity = CallbackIdentity {
            name: "abc".into(),
            category: "cat".into(),
        };
        let value = serde_json::to_value(&identity).unwrap();
        assert_eq!(value, serde_json::json!({"name": "abc", "category": "cat"}));
    }

    #[test]
    fn test_implicit_context_round_trip() {
        let ctx = ImplicitContext::new();

        assert!(ctx.put("trestle.session", "s1".into()).is_none());
        assert_eq!(ctx.get("trestle.session").as_deref(), Some("s1"));

        let previous = ctx.put("trestle.session", "s2".into());
        assert_eq!(previous.as_deref(), Some("s1"));

        assert_eq!(ctx.remove("trestle.session").as_deref(), Some("s2"));
        assert!(ctx.get("trestle.session").is_none());
    }

    #[test]
    fn test_implicit_context_snapshot_is_copy() {
        let ctx = ImplicitContext::new();
        ctx.put("a", "1".into());

        let snapshot = ctx.snapshot();
        ctx.put("b", "2".into());

        assert_eq!(snapshot.len(), 1);
        assert_eq!(ctx.snapshot().len(), 2);
    }
}
