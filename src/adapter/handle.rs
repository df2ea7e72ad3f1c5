//! Adapted operation surface over one service object.
//!
//! [`adapt`] runs the naming matcher once and builds a dispatch table from
//! operation name to a tagged variant: bridged (awaitable built atop the
//! bridge), passthrough (direct synchronous forward), or factory (bridged,
//! then the proxy reply is adapted in turn). Callers invoke by name through
//! the table; the handle never grows or changes after construction.
//!
//! # Example
//!
//! ```ignore
//! use trestle::adapter::adapt;
//!
//! let query = adapt(service, &bridge);
//! let rows = query
//!     .invoke("findAllByQuery", CallPayload::positional(vec![json!(hql)]))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bridge::BridgeHandle;
use crate::error::{Result, TrestleError};
use crate::service::{CallPayload, OperationMetadata, Reply, ServiceObject, ServiceRef};

use super::triad::partition_operations;

/// Dispatch entry for one adapted operation.
#[derive(Debug, Clone)]
pub(crate) enum OperationKind {
    /// Awaitable call through the bridge; `begin` is the send-phase name.
    Bridged { begin: String },
    /// Direct forward to the synchronous operation.
    Passthrough,
    /// Bridged factory accessor whose proxy reply is adapted before return.
    Factory { begin: String },
}

/// How an adapted operation dispatches, as visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationFlavor {
    /// Single awaitable call collapsed from a triad.
    Bridged,
    /// Transparent forward to the original synchronous operation.
    Passthrough,
    /// Bridged accessor returning an already-adapted handle.
    Factory,
}

/// Result of invoking an adapted operation.
#[derive(Clone)]
pub enum CallOutcome {
    /// Operation completed without a value.
    Void,
    /// Plain data value.
    Value(serde_json::Value),
    /// Proxy to another service, returned as-is (non-factory operations).
    Proxy(ServiceRef),
    /// Already-adapted handle (factory operations).
    Adapted(AdaptedHandle),
}

impl CallOutcome {
    /// Take the data value, if any.
    pub fn into_value(self) -> Option<serde_json::Value> {
        match self {
            CallOutcome::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Take the raw proxy, if any.
    pub fn into_proxy(self) -> Option<ServiceRef> {
        match self {
            CallOutcome::Proxy(p) => Some(p),
            _ => None,
        }
    }

    /// Take the adapted handle, if any.
    pub fn into_adapted(self) -> Option<AdaptedHandle> {
        match self {
            CallOutcome::Adapted(h) => Some(h),
            _ => None,
        }
    }

    /// True if the operation completed without a value.
    pub fn is_void(&self) -> bool {
        matches!(self, CallOutcome::Void)
    }
}

impl From<Reply> for CallOutcome {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Void => CallOutcome::Void,
            Reply::Value(v) => CallOutcome::Value(v),
            Reply::Proxy(p) => CallOutcome::Proxy(p),
        }
    }
}

impl fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Void => f.write_str("Void"),
            CallOutcome::Value(v) => f.debug_tuple("Value").field(v).finish(),
            CallOutcome::Proxy(p) => f.debug_tuple("Proxy").field(&p.interface_id()).finish(),
            CallOutcome::Adapted(h) => f.debug_tuple("Adapted").field(h).finish(),
        }
    }
}

/// Uniform operation surface over one underlying service object.
///
/// Built by [`adapt`] (or `adapt_session`); holds a non-owning reference to
/// the service, the scheduler context, and the immutable dispatch table.
/// Cloning is cheap and clones share the table.
#[derive(Clone)]
pub struct AdaptedHandle {
    /// Underlying service; calls are forwarded, resources are not owned.
    service: ServiceRef,
    /// Scheduler context used for bridged operations.
    bridge: BridgeHandle,
    /// Operation name to dispatch variant, fixed at construction.
    table: Arc<HashMap<String, OperationKind>>,
}

impl AdaptedHandle {
    pub(crate) fn from_parts(
        service: ServiceRef,
        bridge: BridgeHandle,
        table: Arc<HashMap<String, OperationKind>>,
    ) -> Self {
        Self {
            service,
            bridge,
            table,
        }
    }

    /// Interface identifier of the underlying service.
    pub fn interface_id(&self) -> &str {
        self.service.interface_id()
    }

    /// Proxy identity of the underlying service, if it has one.
    pub fn identity(&self) -> Option<String> {
        self.service.identity()
    }

    /// The underlying service object.
    pub fn underlying(&self) -> &ServiceRef {
        &self.service
    }

    /// Adapted operation names, sorted.
    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.sort();
        names
    }

    /// How the named operation dispatches, if it exists.
    pub fn flavor(&self, operation: &str) -> Option<OperationFlavor> {
        self.table.get(operation).map(|kind| match kind {
            OperationKind::Bridged { .. } => OperationFlavor::Bridged,
            OperationKind::Passthrough => OperationFlavor::Passthrough,
            OperationKind::Factory { .. } => OperationFlavor::Factory,
        })
    }

    /// Metadata of the named operation, forwarded from the underlying
    /// service under the registered name.
    pub fn metadata(&self, operation: &str) -> Option<OperationMetadata> {
        if !self.table.contains_key(operation) {
            return None;
        }
        self.service.metadata(operation)
    }

    /// Invoke an adapted operation by name.
    ///
    /// Bridged operations suspend until the underlying callback fires;
    /// passthroughs forward synchronously; factories return an
    /// already-adapted handle for the proxy they produce.
    pub async fn invoke(&self, operation: &str, payload: CallPayload) -> Result<CallOutcome> {
        let kind = self
            .table
            .get(operation)
            .ok_or_else(|| TrestleError::UnknownOperation(operation.to_string()))?;

        match kind {
            OperationKind::Passthrough => {
                let reply = self.service.call(operation, payload)?;
                Ok(reply.into())
            }
            OperationKind::Bridged { begin } => {
                let reply = self.begin_bridged(begin, payload).await?;
                Ok(reply.into())
            }
            OperationKind::Factory { begin } => {
                let reply = self.begin_bridged(begin, payload).await?;
                match reply {
                    Reply::Proxy(service) => {
                        Ok(CallOutcome::Adapted(adapt(service, &self.bridge)))
                    }
                    other => Err(TrestleError::UnexpectedReply(format!(
                        "factory operation {} returned {} instead of a proxy",
                        operation, other
                    ))),
                }
            }
        }
    }

    /// Run one begin-style invocation through the bridge.
    async fn begin_bridged(&self, begin: &str, payload: CallPayload) -> Result<Reply> {
        let service = self.service.clone();
        let begin_name = begin.to_string();
        self.bridge
            .bridge(begin, move |hooks| {
                service.begin(&begin_name, payload, hooks)
            })
            .await
    }
}

impl fmt::Debug for AdaptedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptedHandle")
            .field("interface", &self.service.interface_id())
            .field("operations", &self.table.len())
            .finish()
    }
}

/// Build the dispatch table for one service object.
pub(crate) fn build_table(service: &dyn ServiceObject) -> HashMap<String, OperationKind> {
    let partition = partition_operations(service.operation_names());

    let mut table = HashMap::new();
    for triad in partition.triads {
        table.insert(triad.plain, OperationKind::Bridged { begin: triad.begin });
    }
    for name in partition.passthrough {
        table.insert(name, OperationKind::Passthrough);
    }
    table
}

/// Adapt a service object into a uniform awaitable operation surface.
///
/// Runs one introspection pass over the service's operation names: confirmed
/// triads collapse into a single awaitable operation under the plain name,
/// everything else forwards unchanged.
pub fn adapt(service: ServiceRef, bridge: &BridgeHandle) -> AdaptedHandle {
    let table = build_table(service.as_ref());
    AdaptedHandle::from_parts(service, bridge.clone(), Arc::new(table))
}
