//! Service surface consumed by the adapters.
//!
//! A [`ServiceObject`] is any remote-service handle following the wrapped
//! library's naming contract: asynchronous operations appear as triads
//! (`begin_<name>`, `<name>`, `end_<name>`) and everything else is a plain
//! synchronous operation. The adapters never see a concrete service type,
//! only this trait.
//!
//! # Example
//!
//! ```ignore
//! use trestle::service::{CallPayload, Reply};
//!
//! let payload = CallPayload::positional(vec![serde_json::json!("SELECT i FROM Image i")])
//!     .with_context([("trestle.agent".to_string(), "demo".to_string())].into());
//! let reply = service.call("getServerVersion", payload)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::bridge::ReplyHooks;
use crate::error::RemoteError;

/// Shared reference to a service object.
///
/// Adapted handles hold one of these; they forward calls but do not own the
/// underlying network resources.
pub type ServiceRef = Arc<dyn ServiceObject>;

/// Arguments for one operation invocation.
///
/// Arguments are positional JSON values; the optional context carries
/// per-call string metadata (agent, origin, session id) the way the wrapped
/// library's call contexts do.
#[derive(Debug, Clone, Default)]
pub struct CallPayload {
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Optional per-call context entries.
    pub context: Option<HashMap<String, String>>,
}

impl CallPayload {
    /// Create an empty payload (no arguments, no context).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a payload from positional arguments.
    pub fn positional(args: Vec<Value>) -> Self {
        Self {
            args,
            context: None,
        }
    }

    /// Attach a per-call context.
    pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = Some(context);
        self
    }

    /// Get a positional argument by index.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Get a context entry by key.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.as_ref()?.get(key).map(String::as_str)
    }
}

/// Result value of one remote operation.
#[derive(Clone)]
pub enum Reply {
    /// Operation completed without a value.
    Void,
    /// Plain data value.
    Value(Value),
    /// A proxy to another service object (factory results, session
    /// factories).
    Proxy(ServiceRef),
}

impl Reply {
    /// True if this reply carries no value.
    pub fn is_void(&self) -> bool {
        matches!(self, Reply::Void)
    }

    /// Borrow the data value, if any.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Reply::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Take the proxy, if this reply is one.
    pub fn into_proxy(self) -> Option<ServiceRef> {
        match self {
            Reply::Proxy(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Void => f.write_str("Void"),
            Reply::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Reply::Proxy(p) => f.debug_tuple("Proxy").field(&p.interface_id()).finish(),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Void => f.write_str("(void)"),
            Reply::Value(v) => write!(f, "{}", v),
            Reply::Proxy(p) => write!(f, "proxy {}", p.interface_id()),
        }
    }
}

/// Send-phase outcome of a begin-style invocation.
///
/// Mirrors the flags the underlying library reports right after dispatch;
/// logged at debug level by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Request left the local side.
    pub sent: bool,
    /// Request already completed during the send phase.
    pub completed: bool,
}

impl SendReceipt {
    /// Create a receipt with explicit flags.
    pub fn new(sent: bool, completed: bool) -> Self {
        Self { sent, completed }
    }

    /// Receipt for the common case: dispatched, completion pending.
    pub fn dispatched() -> Self {
        Self::new(true, false)
    }
}

/// Documentation and signature metadata of one operation.
///
/// Forwarded through adapted handles so introspection sees the original
/// operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationMetadata {
    /// Human-readable documentation.
    pub doc: Option<String>,
    /// Rendered call signature.
    pub signature: Option<String>,
}

/// A remote-service handle the adapters can introspect and invoke.
///
/// Implementations must be callable from any thread; `begin` may fire its
/// hooks from a foreign thread at any later point.
pub trait ServiceObject: Send + Sync {
    /// Interface identifier of this service (used for type checks).
    fn interface_id(&self) -> &str;

    /// Proxy identity, if this handle has one (session factories do).
    fn identity(&self) -> Option<String> {
        None
    }

    /// All externally visible operation names, including the `begin_` and
    /// `end_` variants of asynchronous operations.
    fn operation_names(&self) -> Vec<String>;

    /// Metadata for one operation, if the service carries any.
    fn metadata(&self, operation: &str) -> Option<OperationMetadata> {
        let _ = operation;
        None
    }

    /// Start an asynchronous operation (`operation` is the `begin_`-prefixed
    /// name). Returns once the request is dispatched; exactly one of the
    /// hooks must fire exactly once, possibly from a foreign thread.
    fn begin(
        &self,
        operation: &str,
        payload: CallPayload,
        hooks: ReplyHooks,
    ) -> Result<SendReceipt, RemoteError>;

    /// Invoke a plain synchronous operation.
    fn call(&self, operation: &str, payload: CallPayload) -> Result<Reply, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_positional() {
        let payload = CallPayload::positional(vec![json!(1), json!("two")]);
        assert_eq!(payload.arg(0), Some(&json!(1)));
        assert_eq!(payload.arg(1), Some(&json!("two")));
        assert!(payload.arg(2).is_none());
        assert!(payload.context.is_none());
    }

    #[test]
    fn test_payload_context() {
        let mut ctx = HashMap::new();
        ctx.insert("trestle.agent".to_string(), "tester".to_string());
        let payload = CallPayload::new().with_context(ctx);

        assert_eq!(payload.context_value("trestle.agent"), Some("tester"));
        assert!(payload.context_value("missing").is_none());
    }

    #[test]
    fn test_reply_display() {
        assert_eq!(Reply::Void.to_string(), "(void)");
        assert_eq!(Reply::Value(json!({"a": 1})).to_string(), r#"{"a":1}"#);
    }

    #[test]
    fn test_reply_accessors() {
        assert!(Reply::Void.is_void());
        assert_eq!(Reply::Value(json!(7)).as_value(), Some(&json!(7)));
        assert!(Reply::Value(json!(7)).into_proxy().is_none());
    }

    #[test]
    fn test_send_receipt() {
        let receipt = SendReceipt::dispatched();
        assert!(receipt.sent);
        assert!(!receipt.completed);
        assert_eq!(receipt, SendReceipt::new(true, false));
    }
}
