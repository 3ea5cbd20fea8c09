//! Host callback channel.
//!
//! Sandboxed code cannot touch the host directly; the only sanctioned path
//! is a named callback registered here and exposed on the session's bridge.
//! Arguments and return values cross the boundary as JSON text: the guest
//! serializes its argument, the host deserializes it, invokes the handler,
//! and serializes a [`CallbackReply`] envelope back. A handler failure is
//! delivered inside that envelope, visible to the guest, never as a host
//! abort.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::trace;

use crate::wire::CallbackReply;

/// Errors surfaced to the sandboxed caller of a host function.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallbackError {
    /// No handler is registered under the requested name.
    #[error("unknown host function: {0}")]
    Unknown(String),
    /// The handler rejected; carries its failure message.
    #[error("{0}")]
    Handler(String),
    /// The argument or reply could not cross the boundary.
    #[error("marshalling failure: {0}")]
    Marshal(String),
}

/// A host-side async function reachable by name from sandboxed code.
///
/// # Example
///
/// ```rust,ignore
/// use coral::{CallbackError, HostCallback};
/// use serde_json::{Value, json};
///
/// struct Reply;
///
/// #[async_trait::async_trait]
/// impl HostCallback for Reply {
///     async fn invoke(&self, argument: Value) -> Result<Value, CallbackError> {
///         Ok(json!({"reply": "Message received", "original": argument}))
///     }
/// }
/// ```
#[async_trait]
pub trait HostCallback: Send + Sync {
    /// Handle one invocation from the sandbox.
    ///
    /// The argument has already been unmarshalled from the transport
    /// format; the return value is marshalled back before the sandboxed
    /// caller resumes.
    async fn invoke(&self, argument: Value) -> Result<Value, CallbackError>;
}

/// Blanket implementation for async closures.
///
/// Allows registering closures directly:
/// ```rust,ignore
/// executor.register_callback("send_message", |message| async move {
///     Ok(json!({"reply": "Message received", "original": message}))
/// });
/// ```
#[async_trait]
impl<F, Fut> HostCallback for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, CallbackError>> + Send,
{
    async fn invoke(&self, argument: Value) -> Result<Value, CallbackError> {
        self(argument).await
    }
}

/// Named host callbacks awaiting exposure on a session.
///
/// The registry itself is host-side state; the executor exposes a snapshot
/// of it on each fresh session before submitting code.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn HostCallback>>>,
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl CallbackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, handler: impl HostCallback + 'static) {
        self.register_arc(name, Arc::new(handler));
    }

    /// Register an already-shared handler under `name`.
    pub fn register_arc(&self, name: impl Into<String>, handler: Arc<dyn HostCallback>) {
        let name = name.into();
        trace!(name = %name, "registering host callback");
        self.write_lock().insert(name, handler);
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn HostCallback>> {
        self.read_lock().get(name).cloned()
    }

    /// Snapshot of all registered handlers, for exposure on a session.
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn HostCallback>)> {
        self.read_lock()
            .iter()
            .map(|(name, handler)| (name.clone(), Arc::clone(handler)))
            .collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    /// True when no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn HostCallback>>> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn HostCallback>>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Host side of one callback invocation: unmarshal the transport payload,
/// invoke the handler, marshal the reply envelope.
///
/// Never fails outward; malformed payloads and handler rejections both
/// become `ok: false` envelopes for the guest.
pub(crate) async fn dispatch_transport(handler: &Arc<dyn HostCallback>, payload: &str) -> String {
    let reply = match serde_json::from_str::<Value>(payload) {
        Err(e) => CallbackReply::rejected(format!("malformed argument: {e}")),
        Ok(argument) => match handler.invoke(argument).await {
            Ok(value) => CallbackReply::resolved(value),
            Err(e) => CallbackReply::rejected(e.to_string()),
        },
    };
    serde_json::to_string(&reply)
        .unwrap_or_else(|e| json!({"ok": false, "error": format!("encode failure: {e}")}).to_string())
}
