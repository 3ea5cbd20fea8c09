//! The isolation boundary.
//!
//! A [`Bridge`] is the sole channel into one isolated runtime instance: it
//! can submit program text for asynchronous evaluation, install
//! host-callable functions reachable from inside, and execute typed
//! filesystem requests against the runtime's embedded store. Nothing else
//! crosses.
//!
//! The crate ships one implementation, [`local::LocalBridge`], which runs
//! the store and marshalling in-process; production embedders point a
//! [`BridgeLauncher`] at whatever transport reaches their real runtime.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::callback::HostCallback;
use crate::wire::{FsRequest, FsResponse};

pub mod local;
mod store;

/// Errors raised at the isolation boundary itself.
///
/// Faults inside the runtime (program exceptions, filesystem failures) are
/// not bridge errors; they travel back as data in the respective envelopes.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The isolated runtime failed to start or load. Fatal for the call
    /// that observed it only; other sessions are unaffected.
    #[error("isolated runtime unavailable: {0}")]
    Unavailable(String),
    /// The session backing this bridge has been torn down.
    #[error("session closed")]
    Closed,
    /// The transport to the runtime broke mid-call.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A value could not be encoded or decoded at the boundary.
    #[error("marshalling failure: {0}")]
    Marshal(String),
}

/// Opaque channel into one isolated runtime instance.
///
/// Delivery is FIFO per session: operations issued sequentially through one
/// bridge resolve in issuance order. Operations on distinct bridges are
/// unordered relative to each other.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Submit program text for asynchronous evaluation.
    ///
    /// The runtime captures the program's standard-output stream into an
    /// in-memory buffer for the duration of the run and resolves with an
    /// [`crate::wire::EvalEnvelope`] value. Dropping the returned future
    /// abandons the evaluation at the boundary; code already running in an
    /// uncooperative runtime may keep consuming resources until
    /// [`Bridge::shutdown`].
    async fn evaluate(&self, source: &str, args: Vec<Value>) -> Result<Value, BridgeError>;

    /// Install a host callback reachable by `name` from guest code.
    async fn expose_function(
        &self,
        name: &str,
        handler: Arc<dyn HostCallback>,
    ) -> Result<(), BridgeError>;

    /// Execute one typed filesystem request against the runtime's store.
    ///
    /// Exactly one round trip per request; no batching, no retries.
    async fn fs(&self, request: FsRequest) -> Result<FsResponse, BridgeError>;

    /// Release the runtime instance and everything it owns. Idempotent.
    async fn shutdown(&self);
}

/// Factory for bridges; launching is the `BridgeUnavailable` failure point.
#[async_trait]
pub trait BridgeLauncher: Send + Sync {
    /// Start a fresh isolated runtime and return its bridge.
    async fn launch(&self) -> Result<Arc<dyn Bridge>, BridgeError>;
}
