//! Callback-to-future bridge with a dedicated completion-routing task.
//!
//! The wrapped RPC library runs begin-style operations that call back from
//! foreign worker threads. This module turns one such call into a single
//! awaitable: the caller registers a pending call, hands a pair of hooks to
//! the underlying operation, and suspends until whichever hook fires posts
//! the completion back onto the routing task's channel.
//!
//! # Architecture
//!
//! ```text
//! Caller task ──► Register ─┐
//! Foreign thread ─► Complete ─┼─► mpsc::UnboundedSender<BridgeMsg> ─► Routing Task
//! Caller task ──► Discard ──┘                                          │
//!                                    oneshot per pending call ◄────────┘
//! ```
//!
//! Pending calls live only inside the routing task; hooks never touch
//! scheduler-owned state. Completions are posted from foreign threads that
//! must not block, so the channel is unbounded.
//!
//! # Example
//!
//! ```ignore
//! use trestle::bridge::spawn_bridge_task_default;
//!
//! let (bridge, _task) = spawn_bridge_task_default();
//! let reply = bridge
//!     .bridge("begin_echo", |hooks| service.begin("begin_echo", payload, hooks))
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{RemoteError, Result, TrestleError};
use crate::service::{Reply, SendReceipt};

/// Identifier of one in-flight bridged call.
pub type CallId = u64;

/// Resolution of one bridged call.
type Completion = std::result::Result<Reply, RemoteError>;

/// Configuration for the completion-routing task.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Optional per-call timeout. `None` (the default) waits indefinitely;
    /// a call whose operation never fires a hook then never resolves.
    pub call_timeout: Option<Duration>,
}

/// Messages processed by the routing task.
enum BridgeMsg {
    /// A new call is waiting for its completion.
    Register {
        id: CallId,
        operation: String,
        reply_tx: oneshot::Sender<Completion>,
    },
    /// A hook fired with the call's outcome.
    Complete { id: CallId, outcome: Completion },
    /// The caller gave up on the call (send-phase failure or timeout).
    Discard { id: CallId },
}

/// One in-flight bridged invocation, owned by the routing task until
/// resolved.
struct PendingCall {
    /// Operation name, for diagnostics.
    operation: String,
    /// Channel back to the awaiting caller.
    reply_tx: oneshot::Sender<Completion>,
}

/// Success and failure hooks for one bridged call.
///
/// Handed to the underlying begin-style operation; exactly one hook must
/// fire exactly once. Firing consumes the hook, so a single hook cannot be
/// invoked twice; a late completion for an already-resolved call is dropped
/// by the routing task with a warning. Hooks are `Send` and may fire from
/// any thread without blocking.
pub struct ReplyHooks {
    id: CallId,
    tx: mpsc::UnboundedSender<BridgeMsg>,
}

impl ReplyHooks {
    /// Resolve the call with a value.
    pub fn succeed(self, reply: Reply) {
        let _ = self.tx.send(BridgeMsg::Complete {
            id: self.id,
            outcome: Ok(reply),
        });
    }

    /// Resolve the call with a failure.
    pub fn fail(self, error: RemoteError) {
        let _ = self.tx.send(BridgeMsg::Complete {
            id: self.id,
            outcome: Err(error),
        });
    }

    /// Split into independent success and failure halves, for libraries
    /// that want the two callbacks as separate values.
    pub fn split(self) -> (SuccessHook, FailureHook) {
        let success = SuccessHook {
            id: self.id,
            tx: self.tx.clone(),
        };
        let failure = FailureHook {
            id: self.id,
            tx: self.tx,
        };
        (success, failure)
    }
}

/// Success half of a split [`ReplyHooks`].
pub struct SuccessHook {
    id: CallId,
    tx: mpsc::UnboundedSender<BridgeMsg>,
}

impl SuccessHook {
    /// Resolve the call with a value.
    pub fn resolve(self, reply: Reply) {
        let _ = self.tx.send(BridgeMsg::Complete {
            id: self.id,
            outcome: Ok(reply),
        });
    }
}

/// Failure half of a split [`ReplyHooks`].
pub struct FailureHook {
    id: CallId,
    tx: mpsc::UnboundedSender<BridgeMsg>,
}

impl FailureHook {
    /// Resolve the call with a failure.
    pub fn reject(self, error: RemoteError) {
        let _ = self.tx.send(BridgeMsg::Complete {
            id: self.id,
            outcome: Err(error),
        });
    }
}

/// Scheduler context for bridged calls.
///
/// Cheaply cloneable; every adaptation and bridging operation takes one
/// explicitly. All clones feed the same routing task.
#[derive(Clone)]
pub struct BridgeHandle {
    /// Channel into the routing task.
    tx: mpsc::UnboundedSender<BridgeMsg>,
    /// Next call id.
    next_id: Arc<AtomicU64>,
    /// Per-call timeout, if configured.
    call_timeout: Option<Duration>,
}

impl BridgeHandle {
    /// Issue one bridged call and await its resolution.
    ///
    /// `invoke` receives the hooks and must start the underlying operation,
    /// returning its send receipt without blocking. A synchronous error from
    /// `invoke` fails the call immediately and discards the pending entry.
    pub async fn bridge<F>(&self, operation: &str, invoke: F) -> Result<Reply>
    where
        F: FnOnce(ReplyHooks) -> std::result::Result<SendReceipt, RemoteError>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send(BridgeMsg::Register {
                id,
                operation: operation.to_string(),
                reply_tx,
            })
            .map_err(|_| TrestleError::BridgeClosed)?;

        let hooks = ReplyHooks {
            id,
            tx: self.tx.clone(),
        };

        let receipt = match invoke(hooks) {
            Ok(receipt) => receipt,
            Err(err) => {
                let _ = self.tx.send(BridgeMsg::Discard { id });
                return Err(err.into());
            }
        };
        tracing::debug!(
            "Operation {} dispatched, sent={} completed={}",
            operation,
            receipt.sent,
            receipt.completed
        );

        let outcome = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(received) => received,
                Err(_) => {
                    let _ = self.tx.send(BridgeMsg::Discard { id });
                    return Err(TrestleError::CallTimeout {
                        operation: operation.to_string(),
                        limit,
                    });
                }
            },
            None => reply_rx.await,
        };

        match outcome {
            Ok(completion) => completion.map_err(TrestleError::from),
            Err(_) => Err(TrestleError::BridgeClosed),
        }
    }

    /// The configured per-call timeout, if any.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }
}

/// Spawn the completion-routing task and return the scheduler context.
///
/// # Returns
///
/// A tuple of `(BridgeHandle, JoinHandle)`; the task exits once every
/// handle and hook clone has been dropped.
pub fn spawn_bridge_task(config: BridgeConfig) -> (BridgeHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = BridgeHandle {
        tx,
        next_id: Arc::new(AtomicU64::new(1)),
        call_timeout: config.call_timeout,
    };

    let task = tokio::spawn(bridge_loop(rx));

    (handle, task)
}

/// Spawn the completion-routing task with default configuration.
pub fn spawn_bridge_task_default() -> (BridgeHandle, JoinHandle<()>) {
    spawn_bridge_task(BridgeConfig::default())
}

/// Main routing loop: registers pending calls and resolves them as
/// completions arrive.
async fn bridge_loop(mut rx: mpsc::UnboundedReceiver<BridgeMsg>) {
    let mut pending: HashMap<CallId, PendingCall> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            BridgeMsg::Register {
                id,
                operation,
                reply_tx,
            } => {
                pending.insert(
                    id,
                    PendingCall {
                        operation,
                        reply_tx,
                    },
                );
            }
            BridgeMsg::Complete { id, outcome } => {
                let Some(call) = pending.remove(&id) else {
                    tracing::warn!("Completion for unknown call {} dropped", id);
                    continue;
                };
                match &outcome {
                    Ok(reply) => tracing::info!(
                        "Operation {} resolved: {}",
                        call.operation,
                        firstline_truncate(&reply.to_string())
                    ),
                    Err(err) => tracing::warn!(
                        "Operation {} failed: {}",
                        call.operation,
                        firstline_truncate(&err.to_string())
                    ),
                }
                if call.reply_tx.send(outcome).is_err() {
                    tracing::debug!("Caller for operation {} gone before completion", call.operation);
                }
            }
            BridgeMsg::Discard { id } => {
                if let Some(call) = pending.remove(&id) {
                    tracing::debug!("Discarded pending call {} ({})", id, call.operation);
                }
            }
        }
    }
}

/// Cut a rendered value down to a loggable first line.
///
/// Values whose first line exceeds 80 characters, or which span multiple
/// lines, are cut to the first 79 characters plus an ellipsis.
fn firstline_truncate(s: &str) -> String {
    let first = s.lines().next().unwrap_or("");
    if first.chars().count() > 80 || s.contains('\n') {
        let head: String = first.chars().take(79).collect();
        format!("{}…", head)
    } else {
        first.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    #[test]
    fn test_bridge_config_default() {
        let config = BridgeConfig::default();
        assert!(config.call_timeout.is_none());
    }

    #[test]
    fn test_firstline_truncate_short() {
        assert_eq!(firstline_truncate("ok"), "ok");
        assert_eq!(firstline_truncate(""), "");
    }

    #[test]
    fn test_firstline_truncate_boundary() {
        let exactly_80: String = "x".repeat(80);
        assert_eq!(firstline_truncate(&exactly_80), exactly_80);

        let over = "x".repeat(81);
        let cut = firstline_truncate(&over);
        assert_eq!(cut.chars().count(), 80);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_firstline_truncate_multiline() {
        let cut = firstline_truncate("first\nsecond");
        assert_eq!(cut, "first…");
    }

    #[tokio::test]
    async fn test_bridge_resolves_value() {
        let (bridge, _task) = spawn_bridge_task_default();

        let reply = bridge
            .bridge("begin_echo", |hooks| {
                hooks.succeed(Reply::Value(json!(42)));
                Ok(SendReceipt::new(true, true))
            })
            .await
            .unwrap();

        assert_eq!(reply.as_value(), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_bridge_resolves_from_foreign_thread() {
        let (bridge, _task) = spawn_bridge_task_default();

        let reply = bridge
            .bridge("begin_query", |hooks| {
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(10));
                    hooks.succeed(Reply::Value(json!(["row"])));
                });
                Ok(SendReceipt::dispatched())
            })
            .await
            .unwrap();

        assert_eq!(reply.as_value(), Some(&json!(["row"])));
    }

    #[tokio::test]
    async fn test_bridge_propagates_failure() {
        let (bridge, _task) = spawn_bridge_task_default();

        let err = bridge
            .bridge("begin_query", |hooks| {
                std::thread::spawn(move || {
                    hooks.fail(RemoteError::Operation("backend down".into()));
                });
                Ok(SendReceipt::dispatched())
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TrestleError::Remote(RemoteError::Operation(_))
        ));
    }

    #[tokio::test]
    async fn test_send_phase_error_fails_immediately() {
        let (bridge, _task) = spawn_bridge_task_default();

        let err = bridge
            .bridge("begin_query", |_hooks| {
                Err(RemoteError::ConnectTimeout("no route".into()))
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TrestleError::Remote(RemoteError::ConnectTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_split_hooks_first_completion_wins() {
        let (bridge, _task) = spawn_bridge_task_default();

        let reply = bridge
            .bridge("begin_echo", |hooks| {
                let (success, failure) = hooks.split();
                success.resolve(Reply::Value(json!("first")));
                // A late fire on the other half is dropped by the routing
                // task, never applied.
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    failure.reject(RemoteError::Operation("late".into()));
                });
                Ok(SendReceipt::dispatched())
            })
            .await
            .unwrap();

        assert_eq!(reply.as_value(), Some(&json!("first")));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_call_timeout_when_hooks_never_fire() {
        let (bridge, _task) = spawn_bridge_task(BridgeConfig {
            call_timeout: Some(Duration::from_millis(50)),
        });

        let err = bridge
            .bridge("begin_stuck", |_hooks| Ok(SendReceipt::dispatched()))
            .await
            .unwrap_err();

        assert!(matches!(err, TrestleError::CallTimeout { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_calls_resolve_independently() {
        let (bridge, _task) = spawn_bridge_task_default();
        let started = Instant::now();

        let mut join_set = tokio::task::JoinSet::new();
        for i in 0..4u64 {
            let bridge = bridge.clone();
            join_set.spawn(async move {
                bridge
                    .bridge("begin_sleepy", move |hooks| {
                        std::thread::spawn(move || {
                            std::thread::sleep(Duration::from_millis(40));
                            hooks.succeed(Reply::Value(json!(i)));
                        });
                        Ok(SendReceipt::dispatched())
                    })
                    .await
            });
        }

        let mut values = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let reply = joined.unwrap().unwrap();
            values.push(reply.as_value().unwrap().as_u64().unwrap());
        }
        values.sort_unstable();

        assert_eq!(values, vec![0, 1, 2, 3]);
        // Four 40ms calls issued together finish in roughly one delay, not
        // four.
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_bridge_closed_after_task_gone() {
        let (bridge, task) = spawn_bridge_task_default();
        task.abort();
        let _ = task.await;

        let err = bridge
            .bridge("begin_echo", |hooks| {
                hooks.succeed(Reply::Void);
                Ok(SendReceipt::dispatched())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TrestleError::BridgeClosed));
    }
}
