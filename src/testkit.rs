//! Scripted in-process doubles for services and the client runtime.
//!
//! [`StubService`] plays back scripted replies. Triad operations expose the
//! full `begin_X` / `X` / `end_X` name set and complete their hooks from a
//! separate thread, the way a real connector's reply thread would. Plain
//! operations answer inline. Every call is recorded and can be inspected
//! afterwards.
//!
//! [`StubRuntime`] and [`StubCallbackAdapter`] satisfy the runtime traits
//! with the same record-and-inspect approach.
//!
//! # Example
//!
//! ```ignore
//! use trestle::testkit::{ScriptStep, StubService};
//!
//! let svc = Arc::new(
//!     StubService::new("::demo::Echo")
//!         .triad("echo", ScriptStep::value(json!("pong")))
//!         .operation("status", ScriptStep::value(json!("ok"))),
//! );
//! let handle = adapt(svc.clone(), &bridge);
//! assert_eq!(svc.call_count("begin_echo"), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::adapter::{BEGIN_PREFIX, END_PREFIX};
use crate::bridge::ReplyHooks;
use crate::error::{RemoteError, TrestleError};
use crate::runtime::{CallbackAdapter, CallbackIdentity, ClientRuntime, ImplicitContext};
use crate::service::{
    CallPayload, OperationMetadata, Reply, SendReceipt, ServiceObject, ServiceRef,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Complete the call with the given reply.
    Succeed(Reply),
    /// Fail the call with the given remote error.
    Fail(RemoteError),
}

impl ScriptStep {
    /// Succeed with a plain data value.
    pub fn value(value: Value) -> Self {
        Self::Succeed(Reply::Value(value))
    }

    /// Succeed without a value.
    pub fn void() -> Self {
        Self::Succeed(Reply::Void)
    }

    /// Succeed with a proxy to another service object.
    pub fn proxy(service: ServiceRef) -> Self {
        Self::Succeed(Reply::Proxy(service))
    }

    /// Succeed with an explicit reply.
    pub fn succeed(reply: Reply) -> Self {
        Self::Succeed(reply)
    }

    /// Fail with a remote error.
    pub fn fail(error: RemoteError) -> Self {
        Self::Fail(error)
    }
}

/// Playback state for one operation: steps run in order, the final step
/// repeats forever.
#[derive(Debug, Clone)]
struct Script {
    steps: VecDeque<ScriptStep>,
    delay: Option<Duration>,
}

impl Script {
    fn single(step: ScriptStep) -> Self {
        Self {
            steps: VecDeque::from(vec![step]),
            delay: None,
        }
    }

    fn sequence(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: steps.into(),
            delay: None,
        }
    }

    fn delayed(step: ScriptStep, delay: Duration) -> Self {
        Self {
            steps: VecDeque::from(vec![step]),
            delay: Some(delay),
        }
    }

    fn next_step(&mut self) -> Option<ScriptStep> {
        if self.steps.len() > 1 {
            self.steps.pop_front()
        } else {
            self.steps.front().cloned()
        }
    }
}

/// A scripted service object.
///
/// Built fluently, then shared as a [`ServiceRef`]. Triad completions fire
/// from a spawned thread so tests exercise the real cross-thread resolution
/// path.
#[derive(Debug)]
pub struct StubService {
    interface_id: String,
    identity: Option<String>,
    triads: Mutex<HashMap<String, Script>>,
    plains: Mutex<HashMap<String, Script>>,
    metadata: HashMap<String, OperationMetadata>,
    calls: Mutex<Vec<(String, CallPayload)>>,
}

impl StubService {
    /// Create a service with the given interface id and no operations.
    pub fn new(interface_id: &str) -> Self {
        Self {
            interface_id: interface_id.to_string(),
            identity: None,
            triads: Mutex::new(HashMap::new()),
            plains: Mutex::new(HashMap::new()),
            metadata: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Give the service a proxy identity.
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = Some(identity.to_string());
        self
    }

    /// Add a triad operation that always answers with `step`.
    pub fn triad(self, operation: &str, step: ScriptStep) -> Self {
        lock(&self.triads).insert(operation.to_string(), Script::single(step));
        self
    }

    /// Add a triad operation that answers with each step in turn, then
    /// repeats the last one.
    pub fn triad_sequence(self, operation: &str, steps: Vec<ScriptStep>) -> Self {
        lock(&self.triads).insert(operation.to_string(), Script::sequence(steps));
        self
    }

    /// Add a triad operation whose completion arrives after `delay`.
    pub fn triad_delayed(self, operation: &str, delay: Duration, step: ScriptStep) -> Self {
        lock(&self.triads).insert(operation.to_string(), Script::delayed(step, delay));
        self
    }

    /// Add a plain operation that answers inline with `step`.
    pub fn operation(self, name: &str, step: ScriptStep) -> Self {
        lock(&self.plains).insert(name.to_string(), Script::single(step));
        self
    }

    /// Attach documentation and a signature to an operation name.
    pub fn describe(mut self, operation: &str, doc: &str, signature: &str) -> Self {
        self.metadata.insert(
            operation.to_string(),
            OperationMetadata {
                doc: Some(doc.to_string()),
                signature: Some(signature.to_string()),
            },
        );
        self
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<(String, CallPayload)> {
        lock(&self.calls).clone()
    }

    /// How many times `operation` was invoked (full name, `begin_` included).
    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|(name, _)| name == operation)
            .count()
    }

    /// The most recent payload sent to `operation`.
    pub fn last_payload(&self, operation: &str) -> Option<CallPayload> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|(name, _)| name == operation)
            .map(|(_, payload)| payload.clone())
    }
}

impl ServiceObject for StubService {
    fn interface_id(&self) -> &str {
        &self.interface_id
    }

    fn identity(&self) -> Option<String> {
        self.identity.clone()
    }

    fn operation_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for plain in lock(&self.triads).keys() {
            names.push(format!("{}{}", BEGIN_PREFIX, plain));
            names.push(plain.clone());
            names.push(format!("{}{}", END_PREFIX, plain));
        }
        names.extend(lock(&self.plains).keys().cloned());
        names
    }

    fn metadata(&self, operation: &str) -> Option<OperationMetadata> {
        self.metadata.get(operation).cloned()
    }

    fn begin(
        &self,
        operation: &str,
        payload: CallPayload,
        hooks: ReplyHooks,
    ) -> Result<SendReceipt, RemoteError> {
        lock(&self.calls).push((operation.to_string(), payload));
        let plain = operation.strip_prefix(BEGIN_PREFIX).ok_or_else(|| {
            RemoteError::Operation(format!("{} is not an asynchronous operation", operation))
        })?;
        let (step, delay) = {
            let mut triads = lock(&self.triads);
            let script = triads
                .get_mut(plain)
                .ok_or_else(|| RemoteError::Operation(format!("no script for {}", plain)))?;
            (script.next_step(), script.delay)
        };
        let step =
            step.ok_or_else(|| RemoteError::Operation(format!("script for {} is empty", plain)))?;

        thread::spawn(move || {
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            match step {
                ScriptStep::Succeed(reply) => hooks.succeed(reply),
                ScriptStep::Fail(error) => hooks.fail(error),
            }
        });
        Ok(SendReceipt::dispatched())
    }

    fn call(&self, operation: &str, payload: CallPayload) -> Result<Reply, RemoteError> {
        lock(&self.calls).push((operation.to_string(), payload));
        let step = {
            let mut plains = lock(&self.plains);
            let script = plains
                .get_mut(operation)
                .ok_or_else(|| RemoteError::Operation(format!("no script for {}", operation)))?;
            script.next_step()
        };
        let step = step
            .ok_or_else(|| RemoteError::Operation(format!("script for {} is empty", operation)))?;
        match step {
            ScriptStep::Succeed(reply) => Ok(reply),
            ScriptStep::Fail(error) => Err(error),
        }
    }
}

/// A scripted client runtime over a single router service.
pub struct StubRuntime {
    router: ServiceRef,
    properties: Mutex<HashMap<String, String>>,
    ready_error: Mutex<Option<String>>,
    base_context: Mutex<HashMap<String, String>>,
    implicit: Arc<ImplicitContext>,
    adapters: Mutex<Vec<Arc<StubCallbackAdapter>>>,
    client_id: String,
    teardown_fails: AtomicBool,
}

impl StubRuntime {
    /// Create a runtime whose router is the given service.
    pub fn new(router: ServiceRef) -> Self {
        Self {
            router,
            properties: Mutex::new(HashMap::new()),
            ready_error: Mutex::new(None),
            base_context: Mutex::new(HashMap::new()),
            implicit: Arc::new(ImplicitContext::new()),
            adapters: Mutex::new(Vec::new()),
            client_id: Uuid::new_v4().to_string(),
            teardown_fails: AtomicBool::new(false),
        }
    }

    /// Set a configuration property.
    pub fn with_property(self: Arc<Self>, key: &str, value: &str) -> Arc<Self> {
        lock(&self.properties).insert(key.to_string(), value.to_string());
        self
    }

    /// Make [`ClientRuntime::ensure_ready`] fail with the given message.
    pub fn with_ready_error(self: Arc<Self>, message: &str) -> Arc<Self> {
        *lock(&self.ready_error) = Some(message.to_string());
        self
    }

    /// Add an entry to the base call context.
    pub fn with_context_entry(self: Arc<Self>, key: &str, value: &str) -> Arc<Self> {
        lock(&self.base_context).insert(key.to_string(), value.to_string());
        self
    }

    /// Make every callback adapter created from now on fail its teardown.
    pub fn with_failing_teardown(self: Arc<Self>) -> Arc<Self> {
        self.teardown_fails.store(true, Ordering::SeqCst);
        self
    }

    /// Callback adapters created so far, in creation order.
    pub fn adapters(&self) -> Vec<Arc<StubCallbackAdapter>> {
        lock(&self.adapters).clone()
    }
}

impl ClientRuntime for StubRuntime {
    fn ensure_ready(&self) -> Result<(), TrestleError> {
        match lock(&self.ready_error).clone() {
            Some(message) => Err(TrestleError::Configuration(message)),
            None => Ok(()),
        }
    }

    fn default_property(&self, key: &str) -> Option<String> {
        lock(&self.properties).get(key).cloned()
    }

    fn call_context(&self) -> HashMap<String, String> {
        lock(&self.base_context).clone()
    }

    fn router(&self) -> Result<ServiceRef, TrestleError> {
        Ok(self.router.clone())
    }

    fn create_callback_adapter(
        &self,
        _router: &ServiceRef,
    ) -> Result<Arc<dyn CallbackAdapter>, TrestleError> {
        let adapter = Arc::new(StubCallbackAdapter::new(
            self.teardown_fails.load(Ordering::SeqCst),
        ));
        lock(&self.adapters).push(adapter.clone());
        Ok(adapter)
    }

    fn implicit_context(&self) -> Arc<ImplicitContext> {
        self.implicit.clone()
    }

    fn client_id(&self) -> String {
        self.client_id.clone()
    }
}

/// A recording callback endpoint.
#[derive(Debug)]
pub struct StubCallbackAdapter {
    registered: Mutex<Vec<CallbackIdentity>>,
    active: AtomicBool,
    deactivations: AtomicUsize,
    teardown_fails: bool,
}

impl StubCallbackAdapter {
    fn new(teardown_fails: bool) -> Self {
        Self {
            registered: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
            deactivations: AtomicUsize::new(0),
            teardown_fails,
        }
    }

    /// Identities registered with this endpoint.
    pub fn registered(&self) -> Vec<CallbackIdentity> {
        lock(&self.registered).clone()
    }

    /// Whether the endpoint is still active.
    pub fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of teardown attempts, failed ones included.
    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

impl CallbackAdapter for StubCallbackAdapter {
    fn register(&self, identity: &CallbackIdentity) -> Result<(), TrestleError> {
        lock(&self.registered).push(identity.clone());
        Ok(())
    }

    fn endpoint(&self, identity: &CallbackIdentity) -> Result<Value, TrestleError> {
        Ok(json!({ "endpoint": identity.to_string() }))
    }

    fn deactivate(&self) -> Result<(), TrestleError> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        if self.teardown_fails {
            return Err(TrestleError::Configuration(
                "callback endpoint refused to deactivate".into(),
            ));
        }
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapt;
    use crate::bridge::spawn_bridge_task_default;

    #[test]
    fn test_triad_names_visible() {
        let svc = StubService::new("::demo::Echo").triad("echo", ScriptStep::void());
        let mut names = svc.operation_names();
        names.sort();
        assert_eq!(names, vec!["begin_echo", "echo", "end_echo"]);
    }

    #[test]
    fn test_call_recording() {
        let svc =
            StubService::new("::demo::Cfg").operation("getValue", ScriptStep::value(json!(5)));

        svc.call("getValue", CallPayload::positional(vec![json!("key")]))
            .unwrap();

        assert_eq!(svc.call_count("getValue"), 1);
        let payload = svc.last_payload("getValue").unwrap();
        assert_eq!(payload.arg(0), Some(&json!("key")));
        assert!(svc.call("unknown", CallPayload::new()).is_err());
    }

    #[tokio::test]
    async fn test_sequence_advances_then_repeats() {
        let svc = Arc::new(StubService::new("::demo::Seq").triad_sequence(
            "step",
            vec![
                ScriptStep::fail(RemoteError::Operation("first".into())),
                ScriptStep::value(json!(2)),
            ],
        ));
        let (bridge, _task) = spawn_bridge_task_default();
        let handle = adapt(svc.clone(), &bridge);

        assert!(handle.invoke("step", CallPayload::new()).await.is_err());
        for _ in 0..2 {
            let outcome = handle.invoke("step", CallPayload::new()).await.unwrap();
            assert_eq!(outcome.into_value(), Some(json!(2)));
        }
        assert_eq!(svc.call_count("begin_step"), 3);
    }

    #[test]
    fn test_callback_adapter_lifecycle() {
        let adapter = StubCallbackAdapter::new(false);
        let identity = CallbackIdentity {
            name: "c1".into(),
            category: "_cat".into(),
        };

        adapter.register(&identity).unwrap();
        assert_eq!(adapter.registered(), vec![identity.clone()]);
        assert!(adapter.active());

        adapter.deactivate().unwrap();
        assert!(!adapter.active());
        assert_eq!(adapter.deactivations(), 1);
    }

    #[test]
    fn test_failing_teardown_still_counted() {
        let router: ServiceRef = Arc::new(StubService::new("::demo::Router"));
        let runtime = Arc::new(StubRuntime::new(router)).with_failing_teardown();

        let adapter = runtime
            .create_callback_adapter(&runtime.router().unwrap())
            .unwrap();

        assert!(adapter.deactivate().is_err());
        assert_eq!(runtime.adapters().len(), 1);
        assert_eq!(runtime.adapters()[0].deactivations(), 1);
    }
}
