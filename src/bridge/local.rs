//! In-process bridge implementation.
//!
//! [`LocalBridge`] is the reference implementation of the wire contract: it
//! owns one embedded store, a table of exposed host callbacks, and a
//! pluggable [`Evaluate`] hook standing in for the interpreter (which this
//! crate deliberately does not implement). Embedders and tests script guest
//! behavior through the hook. Everything the scripted guest can do
//! (print to the captured stdout, call host functions through the full
//! marshal cycle, issue typed filesystem requests) is exactly what real
//! guest code can do.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::store::MemStore;
use super::{Bridge, BridgeError, BridgeLauncher};
use crate::callback::{self, CallbackError, HostCallback};
use crate::wire::{CallbackReply, EvalEnvelope, FsRequest, FsResponse, RuntimeFault};

type CallbackTable = Arc<RwLock<HashMap<String, Arc<dyn HostCallback>>>>;

/// Captured standard-output stream of one evaluation.
#[derive(Clone, Default)]
pub struct StdoutBuffer(Arc<StdMutex<String>>);

impl StdoutBuffer {
    /// Append text to the captured stream.
    pub fn print(&self, text: &str) {
        self.lock().push_str(text);
    }

    /// Append a line to the captured stream.
    pub fn println(&self, line: &str) {
        let mut buffer = self.lock();
        buffer.push_str(line);
        buffer.push('\n');
    }

    fn take(&self) -> String {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for StdoutBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdoutBuffer")
            .field("len", &self.lock().len())
            .finish()
    }
}

/// Capabilities available to code running inside the local runtime.
#[derive(Clone)]
pub struct GuestHandle {
    stdout: StdoutBuffer,
    callbacks: CallbackTable,
    store: Arc<Mutex<MemStore>>,
}

impl fmt::Debug for GuestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestHandle").finish_non_exhaustive()
    }
}

impl GuestHandle {
    /// The captured stdout stream of the current evaluation.
    pub fn stdout(&self) -> &StdoutBuffer {
        &self.stdout
    }

    /// Invoke an exposed host function by name.
    ///
    /// The argument is serialized to the transport format before crossing,
    /// the reply envelope is deserialized before this returns: one full
    /// marshal/unmarshal cycle, the same one a remote runtime would pay.
    /// The caller is suspended until the handler resolves or rejects.
    pub async fn call_host(&self, name: &str, argument: Value) -> Result<Value, CallbackError> {
        let handler = {
            let table = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
            table.get(name).cloned()
        };
        let handler = handler.ok_or_else(|| CallbackError::Unknown(name.to_string()))?;

        let payload =
            serde_json::to_string(&argument).map_err(|e| CallbackError::Marshal(e.to_string()))?;
        trace!(name, "guest calling host function");
        let reply_text = callback::dispatch_transport(&handler, &payload).await;
        let reply: CallbackReply =
            serde_json::from_str(&reply_text).map_err(|e| CallbackError::Marshal(e.to_string()))?;
        if reply.ok {
            Ok(reply.value.unwrap_or(Value::Null))
        } else {
            Err(CallbackError::Handler(reply.error.unwrap_or_default()))
        }
    }

    /// Issue a typed filesystem request against the session's store.
    pub async fn fs(&self, request: FsRequest) -> FsResponse {
        self.store.lock().await.apply(request)
    }
}

/// One evaluation as seen by the pluggable evaluator.
pub struct EvalCall {
    /// The submitted program text.
    pub source: String,
    /// Positional arguments passed alongside it.
    pub args: Vec<Value>,
    /// The guest-side capabilities for this run.
    pub guest: GuestHandle,
}

impl fmt::Debug for EvalCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalCall")
            .field("source_len", &self.source.len())
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Interpreter hook of the local runtime.
///
/// A blanket implementation covers async closures:
/// ```rust,ignore
/// let bridge = LocalBridge::with_evaluator(|call: EvalCall| async move {
///     call.guest.stdout().println("hello");
///     Ok(Value::Null)
/// });
/// ```
pub trait Evaluate: Send + Sync {
    /// Run one evaluation. A returned fault becomes the failure envelope;
    /// the success envelope carries whatever the run printed to stdout.
    fn eval(&self, call: EvalCall) -> BoxFuture<'static, Result<Value, RuntimeFault>>;
}

impl<F, Fut> Evaluate for F
where
    F: Fn(EvalCall) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, RuntimeFault>> + Send + 'static,
{
    fn eval(&self, call: EvalCall) -> BoxFuture<'static, Result<Value, RuntimeFault>> {
        Box::pin(self(call))
    }
}

/// In-process isolated runtime reached through the [`Bridge`] trait.
///
/// The store mutex serializes filesystem requests, giving the per-session
/// FIFO delivery the contract requires. There is no locking beyond that:
/// interleavings of independent requests racing on one session are the
/// caller's problem.
pub struct LocalBridge {
    store: Arc<Mutex<MemStore>>,
    callbacks: CallbackTable,
    evaluator: Arc<dyn Evaluate>,
    closed: AtomicBool,
}

impl fmt::Debug for LocalBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBridge")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for LocalBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBridge {
    /// A bridge with no interpreter installed: evaluations fault, the store
    /// and callback channel are fully functional.
    pub fn new() -> Self {
        Self::from_shared(Arc::new(|_call: EvalCall| async move {
            Err(RuntimeFault::new(
                "RuntimeError",
                "no evaluator installed in the local runtime",
            ))
        }))
    }

    /// A bridge whose evaluations run through `evaluator`.
    pub fn with_evaluator(evaluator: impl Evaluate + 'static) -> Self {
        Self::from_shared(Arc::new(evaluator))
    }

    /// A bridge sharing an already-wrapped evaluator.
    pub fn from_shared(evaluator: Arc<dyn Evaluate>) -> Self {
        Self {
            store: Arc::new(Mutex::new(MemStore::new())),
            callbacks: Arc::new(RwLock::new(HashMap::new())),
            evaluator,
            closed: AtomicBool::new(false),
        }
    }

    fn guard_open(&self) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BridgeError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Bridge for LocalBridge {
    async fn evaluate(&self, source: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.guard_open()?;
        let stdout = StdoutBuffer::default();
        let guest = GuestHandle {
            stdout: stdout.clone(),
            callbacks: Arc::clone(&self.callbacks),
            store: Arc::clone(&self.store),
        };
        trace!(source_len = source.len(), "evaluating in local runtime");
        let call = EvalCall {
            source: source.to_string(),
            args,
            guest,
        };
        let envelope = match self.evaluator.eval(call).await {
            Ok(_value) => EvalEnvelope::success(stdout.take()),
            Err(fault) => EvalEnvelope::failure(&fault),
        };
        serde_json::to_value(envelope).map_err(|e| BridgeError::Marshal(e.to_string()))
    }

    async fn expose_function(
        &self,
        name: &str,
        handler: Arc<dyn HostCallback>,
    ) -> Result<(), BridgeError> {
        self.guard_open()?;
        trace!(name, "exposing host function in local runtime");
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), handler);
        Ok(())
    }

    async fn fs(&self, request: FsRequest) -> Result<FsResponse, BridgeError> {
        self.guard_open()?;
        Ok(self.store.lock().await.apply(request))
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            *self.store.lock().await = MemStore::new();
            self.callbacks
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            debug!("local bridge shut down");
        }
    }
}

/// Launcher producing fresh [`LocalBridge`] instances, one per session.
pub struct LocalLauncher {
    evaluator: Option<Arc<dyn Evaluate>>,
}

impl fmt::Debug for LocalLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalLauncher")
            .field("has_evaluator", &self.evaluator.is_some())
            .finish()
    }
}

impl Default for LocalLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalLauncher {
    /// Launcher for bridges with no interpreter installed.
    pub fn new() -> Self {
        Self { evaluator: None }
    }

    /// Launcher whose bridges share `evaluator`.
    pub fn with_evaluator(evaluator: impl Evaluate + 'static) -> Self {
        Self {
            evaluator: Some(Arc::new(evaluator)),
        }
    }
}

#[async_trait]
impl BridgeLauncher for LocalLauncher {
    async fn launch(&self) -> Result<Arc<dyn Bridge>, BridgeError> {
        let bridge = match &self.evaluator {
            Some(evaluator) => LocalBridge::from_shared(Arc::clone(evaluator)),
            None => LocalBridge::new(),
        };
        Ok(Arc::new(bridge))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn evaluate_captures_stdout_into_envelope() {
        let bridge = LocalBridge::with_evaluator(|call: EvalCall| async move {
            call.guest.stdout().println("Vowel Count: 11");
            Ok(Value::Null)
        });
        let value = bridge.evaluate("print(...)", Vec::new()).await.unwrap();
        let envelope: EvalEnvelope = serde_json::from_value(value).unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.output.unwrap(), "Vowel Count: 11\n");
    }

    #[tokio::test]
    async fn evaluator_fault_becomes_failure_envelope() {
        let bridge = LocalBridge::with_evaluator(|_call: EvalCall| async move {
            Err(RuntimeFault::new("NameError", "name 'x' is not defined"))
        });
        let value = bridge.evaluate("x", Vec::new()).await.unwrap();
        let envelope: EvalEnvelope = serde_json::from_value(value).unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.error.unwrap(), "NameError: name 'x' is not defined");
    }

    #[tokio::test]
    async fn guest_reaches_exposed_functions_only() {
        let bridge = LocalBridge::with_evaluator(|call: EvalCall| async move {
            let reply = call.guest.call_host("send_message", json!({"q": 1})).await;
            match reply {
                Ok(value) => call.guest.stdout().println(&value.to_string()),
                Err(e) => call.guest.stdout().println(&format!("host error: {e}")),
            }
            Ok(Value::Null)
        });

        // Not exposed yet: the guest observes the failure as data.
        let value = bridge.evaluate("", Vec::new()).await.unwrap();
        let envelope: EvalEnvelope = serde_json::from_value(value).unwrap();
        assert!(envelope.output.unwrap().contains("unknown host function"));

        bridge
            .expose_function(
                "send_message",
                Arc::new(|argument: Value| async move {
                    Ok(json!({"reply": "Message received", "original": argument}))
                }),
            )
            .await
            .unwrap();
        let value = bridge.evaluate("", Vec::new()).await.unwrap();
        let envelope: EvalEnvelope = serde_json::from_value(value).unwrap();
        assert!(envelope.output.unwrap().contains("Message received"));
    }

    #[tokio::test]
    async fn guest_and_host_share_the_session_store() {
        let bridge = LocalBridge::with_evaluator(|call: EvalCall| async move {
            let response = call
                .guest
                .fs(FsRequest::Write {
                    path: "/from-guest.txt".to_string(),
                    content: "written inside".to_string(),
                    append: false,
                })
                .await;
            assert_eq!(response, FsResponse::Done);
            Ok(Value::Null)
        });
        bridge.evaluate("", Vec::new()).await.unwrap();

        let response = bridge
            .fs(FsRequest::Read {
                path: "/from-guest.txt".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            response,
            FsResponse::Content {
                content: Some("written inside".to_string())
            }
        );
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_terminal() {
        let bridge = LocalBridge::new();
        bridge
            .fs(FsRequest::MakeDir {
                path: "/d".to_string(),
            })
            .await
            .unwrap();
        bridge.shutdown().await;
        bridge.shutdown().await;
        assert!(matches!(
            bridge.fs(FsRequest::List {
                path: "/".to_string(),
                recursive: false,
                info: false
            })
            .await,
            Err(BridgeError::Closed)
        ));
    }
}
