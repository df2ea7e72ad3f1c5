//! Client facade and session establishment.
//!
//! [`Client`] owns the scheduler context and the one-session-per-client
//! slot. [`Client::create_session`] runs the handshake:
//! 1. Check preconditions (no active session, runtime ready, credentials
//!    resolvable) before any network interaction
//! 2. Acquire the session factory through the router, retrying transient
//!    failures up to the bound
//! 3. Type-check the obtained proxy, fetch the client category, create and
//!    register the local callback endpoint
//! 4. Wrap the session, register the callback with it, publish the session
//!    id into the implicit context
//!
//! Any failure after the endpoint exists deactivates it before propagating;
//! a teardown failure is logged and never masks the original error.
//!
//! # Example
//!
//! ```ignore
//! use trestle::{Client, ClientConfig};
//!
//! let client = Client::new(runtime, ClientConfig::default());
//! let session = client.create_session(Some("public"), Some("public")).await?;
//!
//! let query = session
//!     .invoke("getQueryService", CallPayload::new())
//!     .await?
//!     .into_adapted()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::adapter::{adapt, adapt_session, AdaptedHandle, CallOutcome};
use crate::bridge::{spawn_bridge_task, BridgeConfig, BridgeHandle};
use crate::error::{RemoteError, Result, TrestleError};
use crate::runtime::{CallbackAdapter, CallbackIdentity, ClientRuntime, ImplicitContext};
use crate::service::{CallPayload, ServiceRef};

/// Default agent identifier stamped into acquisition contexts.
pub const DEFAULT_AGENT: &str = "trestle-client";

/// Maximum session-acquisition attempts before giving up.
pub const MAX_ACQUIRE_ATTEMPTS: u32 = 3;

/// Context key carrying the agent identifier.
pub const CONTEXT_AGENT: &str = "trestle.agent";

/// Context key carrying the originating-address hint.
pub const CONTEXT_ORIGIN: &str = "trestle.origin";

/// Implicit-context key under which the session id is published.
pub const CONTEXT_SESSION: &str = "trestle.session";

/// Property consulted when no username is passed explicitly.
pub const PROPERTY_USERNAME: &str = "trestle.user";

/// Property consulted when no password is passed explicitly.
pub const PROPERTY_PASSWORD: &str = "trestle.pass";

/// Interface id the acquired proxy must report to count as a session
/// factory.
pub const SESSION_FACTORY_ID: &str = "::trestle::SessionFactory";

/// Configuration for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Agent identifier sent with every acquisition attempt.
    pub agent: String,
    /// Originating-address hint, sent when set.
    pub origin: Option<String>,
    /// Bridge configuration (per-call timeout).
    pub bridge: BridgeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            agent: DEFAULT_AGENT.to_string(),
            origin: None,
            bridge: BridgeConfig::default(),
        }
    }
}

/// Transient bookkeeping for one establishment call.
#[derive(Debug, Default)]
struct RetryState {
    /// Failed attempts so far.
    attempts: u32,
    /// Reason recorded by the most recent failure.
    last_reason: Option<String>,
}

impl RetryState {
    fn record(&mut self, reason: String) {
        self.attempts += 1;
        self.last_reason = Some(reason);
    }
}

/// An established session: the adapted handle plus the local resources
/// created for it.
#[derive(Clone)]
pub struct SessionHandle {
    /// Session surface, factory accessors included.
    session: AdaptedHandle,
    /// Local callback endpoint registered with the session.
    adapter: Arc<dyn CallbackAdapter>,
    /// Identity the endpoint was registered under.
    identity: CallbackIdentity,
    /// Remote session identifier, when the factory reported one.
    session_id: Option<String>,
}

impl SessionHandle {
    /// The adapted session surface.
    pub fn handle(&self) -> &AdaptedHandle {
        &self.session
    }

    /// Invoke an operation on the session.
    pub async fn invoke(&self, operation: &str, payload: CallPayload) -> Result<CallOutcome> {
        self.session.invoke(operation, payload).await
    }

    /// Remote session identifier, if reported.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Identity of the local callback endpoint.
    pub fn callback_identity(&self) -> &CallbackIdentity {
        &self.identity
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("identity", &self.identity)
            .field("session_id", &self.session_id)
            .field("session", &self.session)
            .finish()
    }
}

/// Client facade over a [`ClientRuntime`].
///
/// Owns the completion-routing task and at most one established session.
/// Establishment runs under a per-client lock; adapted calls after
/// establishment take no client-level locks.
pub struct Client {
    /// Underlying runtime, reached only through its narrow interface.
    runtime: Arc<dyn ClientRuntime>,
    /// Client configuration.
    config: ClientConfig,
    /// Scheduler context shared by every handle this client produces.
    bridge: BridgeHandle,
    /// Established session, if any; doubles as the establishment lock.
    session: Mutex<Option<SessionHandle>>,
    /// Completion-routing task.
    _bridge_task: JoinHandle<()>,
}

impl Client {
    /// Create a client over the given runtime.
    ///
    /// Spawns the completion-routing task; must be called within a tokio
    /// runtime.
    pub fn new(runtime: Arc<dyn ClientRuntime>, config: ClientConfig) -> Self {
        let (bridge, bridge_task) = spawn_bridge_task(config.bridge.clone());
        Self {
            runtime,
            config,
            bridge,
            session: Mutex::new(None),
            _bridge_task: bridge_task,
        }
    }

    /// The scheduler context, for adapting services outside a session.
    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    /// The ambient request context shared by this client's operations.
    pub fn implicit_context(&self) -> Arc<ImplicitContext> {
        self.runtime.implicit_context()
    }

    /// The established session, if any.
    pub async fn session(&self) -> Option<SessionHandle> {
        self.session.lock().await.clone()
    }

    /// Establish a session.
    ///
    /// Credentials resolve explicit argument first, then the configured
    /// `trestle.user` / `trestle.pass` properties; both must be non-empty.
    /// Transient acquisition failures are retried up to
    /// [`MAX_ACQUIRE_ATTEMPTS`]; a conflict the remote side marked
    /// non-retriable propagates immediately. At most one session per client;
    /// concurrent callers serialize on the establishment lock.
    pub async fn create_session(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<SessionHandle> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(TrestleError::Configuration(
                "Session already established for this client".into(),
            ));
        }
        self.runtime.ensure_ready()?;
        let username = self.resolve_credential(username, PROPERTY_USERNAME, "username")?;
        let password = self.resolve_credential(password, PROPERTY_PASSWORD, "password")?;

        let (router, acquired) = self.acquire_factory(&username, &password).await?;

        let factory = match acquired {
            CallOutcome::Proxy(factory) => factory,
            _ => {
                return Err(TrestleError::Configuration(
                    "Obtained null object proxy".into(),
                ))
            }
        };
        if factory.interface_id() != SESSION_FACTORY_ID {
            return Err(TrestleError::Configuration(format!(
                "Obtained proxy is not a session factory: {}",
                factory.interface_id()
            )));
        }

        let category = expect_string(
            router
                .invoke("getCategoryForClient", CallPayload::new())
                .await?,
            "getCategoryForClient",
        )?;

        let endpoint = self.runtime.create_callback_adapter(router.underlying())?;
        let identity = CallbackIdentity {
            name: self.runtime.client_id(),
            category,
        };

        let (session, session_id) =
            match self.bind_session(&factory, endpoint.as_ref(), &identity).await {
                Ok(bound) => bound,
                Err(err) => {
                    if let Err(teardown) = endpoint.deactivate() {
                        tracing::warn!(
                            "Callback endpoint teardown failed during abort: {}",
                            teardown
                        );
                    }
                    return Err(err);
                }
            };

        if let Some(id) = &session_id {
            self.runtime
                .implicit_context()
                .put(CONTEXT_SESSION, id.clone());
        }
        tracing::debug!("Session established for user {}", username);

        let handle = SessionHandle {
            session,
            adapter: endpoint,
            identity,
            session_id,
        };
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Close the established session, if any. Idempotent.
    ///
    /// Removes the published session id and releases the callback endpoint.
    /// Remote teardown belongs to the service owner.
    pub async fn close_session(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        let Some(handle) = slot.take() else {
            return Ok(());
        };
        self.runtime.implicit_context().remove(CONTEXT_SESSION);
        handle.adapter.deactivate()?;
        tracing::debug!("Session closed");
        Ok(())
    }

    /// Acquisition loop: create a session through the router, retrying
    /// transient failures against one shared bound.
    async fn acquire_factory(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(AdaptedHandle, CallOutcome)> {
        let mut retry = RetryState::default();

        loop {
            if retry.attempts >= MAX_ACQUIRE_ATTEMPTS {
                return Err(TrestleError::RetriesExhausted {
                    attempts: retry.attempts,
                    reason: retry
                        .last_reason
                        .unwrap_or_else(|| "no reason recorded".into()),
                });
            }

            let mut context = self.runtime.call_context();
            context.insert(CONTEXT_AGENT.to_string(), self.config.agent.clone());
            if let Some(origin) = &self.config.origin {
                context.insert(CONTEXT_ORIGIN.to_string(), origin.clone());
            }

            let router = adapt(self.runtime.router()?, &self.bridge);
            let payload = CallPayload::positional(vec![json!(username), json!(password)])
                .with_context(context);

            let err = match router.invoke("createSession", payload).await {
                Ok(outcome) => return Ok((router, outcome)),
                Err(err) => err,
            };
            if matches!(
                &err,
                TrestleError::Remote(RemoteError::SessionConflict {
                    retriable: false,
                    ..
                })
            ) {
                return Err(err);
            }
            tracing::debug!(
                "Session acquisition attempt {} failed: {}",
                retry.attempts + 1,
                err
            );
            retry.record(err.to_string());
        }
    }

    /// Steps after the callback endpoint exists; the caller deactivates it
    /// if any of them fails.
    async fn bind_session(
        &self,
        factory: &ServiceRef,
        endpoint: &dyn CallbackAdapter,
        identity: &CallbackIdentity,
    ) -> Result<(AdaptedHandle, Option<String>)> {
        endpoint.register(identity)?;
        let session = adapt_session(factory.clone(), &self.bridge);
        let reference = endpoint.endpoint(identity)?;
        session
            .invoke("setCallback", CallPayload::positional(vec![reference]))
            .await?;
        Ok((session, factory.identity()))
    }

    /// Resolve one credential: non-empty explicit argument, else non-empty
    /// configured property, else a configuration error.
    fn resolve_credential(
        &self,
        explicit: Option<&str>,
        property: &str,
        what: &str,
    ) -> Result<String> {
        explicit
            .map(str::to_string)
            .filter(|v| !v.is_empty())
            .or_else(|| {
                self.runtime
                    .default_property(property)
                    .filter(|v| !v.is_empty())
            })
            .ok_or_else(|| TrestleError::Configuration(format!("No {} specified", what)))
    }
}

/// Extract a string value from a call outcome.
fn expect_string(outcome: CallOutcome, operation: &str) -> Result<String> {
    match outcome {
        CallOutcome::Value(Value::String(s)) => Ok(s),
        other => Err(TrestleError::UnexpectedReply(format!(
            "{} returned {:?} instead of a string",
            operation, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ScriptStep, StubRuntime, StubService};
    use serde_json::json;

    fn happy_runtime() -> Arc<StubRuntime> {
        let query = Arc::new(
            StubService::new("::demo::Query")
                .triad("findAllByQuery", ScriptStep::value(json!(["row"]))),
        );
        let factory = Arc::new(
            StubService::new(SESSION_FACTORY_ID)
                .with_identity("sess-42")
                .triad("getQueryService", ScriptStep::proxy(query))
                .triad("setCallback", ScriptStep::void()),
        );
        let router = Arc::new(
            StubService::new("::demo::Router")
                .operation("getCategoryForClient", ScriptStep::value(json!("_client")))
                .triad("createSession", ScriptStep::proxy(factory)),
        );
        Arc::new(StubRuntime::new(router))
    }

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.agent, DEFAULT_AGENT);
        assert!(config.origin.is_none());
        assert!(config.bridge.call_timeout.is_none());
    }

    #[tokio::test]
    async fn test_credential_explicit_beats_property() {
        let runtime = happy_runtime().with_property(PROPERTY_USERNAME, "from-property");
        let client = Client::new(runtime, ClientConfig::default());

        let resolved = client
            .resolve_credential(Some("explicit"), PROPERTY_USERNAME, "username")
            .unwrap();
        assert_eq!(resolved, "explicit");
    }

    #[tokio::test]
    async fn test_credential_empty_explicit_falls_back() {
        let runtime = happy_runtime().with_property(PROPERTY_USERNAME, "from-property");
        let client = Client::new(runtime, ClientConfig::default());

        let resolved = client
            .resolve_credential(Some(""), PROPERTY_USERNAME, "username")
            .unwrap();
        assert_eq!(resolved, "from-property");
    }

    #[tokio::test]
    async fn test_credential_missing_everywhere() {
        let client = Client::new(happy_runtime(), ClientConfig::default());

        let err = client
            .resolve_credential(None, PROPERTY_USERNAME, "username")
            .unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: No username specified");
    }

    #[tokio::test]
    async fn test_create_session_happy_path() {
        let client = Client::new(happy_runtime(), ClientConfig::default());

        let session = client
            .create_session(Some("public"), Some("public"))
            .await
            .unwrap();

        assert_eq!(session.session_id(), Some("sess-42"));
        assert_eq!(session.callback_identity().category, "_client");
        assert!(client.session().await.is_some());
    }

    #[tokio::test]
    async fn test_second_establishment_rejected() {
        let client = Client::new(happy_runtime(), ClientConfig::default());
        client
            .create_session(Some("public"), Some("public"))
            .await
            .unwrap();

        let err = client
            .create_session(Some("public"), Some("public"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrestleError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_runtime_not_ready_fails_fast() {
        let runtime = happy_runtime().with_ready_error("no previous data to recreate communicator");
        let client = Client::new(runtime, ClientConfig::default());

        let err = client
            .create_session(Some("public"), Some("public"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrestleError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_mistyped_factory_rejected() {
        let factory = Arc::new(
            StubService::new("::demo::NotAFactory").triad("setCallback", ScriptStep::void()),
        );
        let router = Arc::new(
            StubService::new("::demo::Router")
                .operation("getCategoryForClient", ScriptStep::value(json!("_client")))
                .triad("createSession", ScriptStep::proxy(factory)),
        );
        let client = Client::new(Arc::new(StubRuntime::new(router)), ClientConfig::default());

        let err = client
            .create_session(Some("public"), Some("public"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrestleError::Configuration(_)));
        assert!(err.to_string().contains("not a session factory"));
    }

    #[tokio::test]
    async fn test_null_proxy_rejected() {
        let router = Arc::new(
            StubService::new("::demo::Router")
                .operation("getCategoryForClient", ScriptStep::value(json!("_client")))
                .triad("createSession", ScriptStep::void()),
        );
        let client = Client::new(Arc::new(StubRuntime::new(router)), ClientConfig::default());

        let err = client
            .create_session(Some("public"), Some("public"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrestleError::Configuration(_)));
        assert!(err.to_string().contains("null object proxy"));
    }
}
