//! Sandbox session lifecycle.
//!
//! A [`SandboxSession`] owns exactly one isolated runtime instance and
//! backs exactly one logical execution: no state leaks between unrelated
//! runs because nothing survives the session. [`SessionPool`] amortizes the
//! startup cost of that policy by keeping a few warm sessions ready to be
//! handed out. Handed out once, never returned.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::bridge::{Bridge, BridgeError, BridgeLauncher};
use crate::callback::HostCallback;
use crate::wire::{FsRequest, FsResponse};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Allocated, runtime not yet reachable.
    Created,
    /// Runtime up, ready for work.
    Ready,
    /// An evaluation is in flight.
    Executing,
    /// Torn down; all further operations fail.
    Closed,
}

/// One isolated runtime instance, from open to teardown.
pub struct SandboxSession {
    id: u64,
    bridge: Arc<dyn Bridge>,
    state: StdMutex<SessionState>,
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SandboxSession {
    /// Launch a fresh runtime and wrap it in a ready session.
    pub async fn open(launcher: &dyn BridgeLauncher) -> Result<Self, BridgeError> {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, "opening sandbox session");
        let bridge = launcher.launch().await?;
        let session = Self {
            id,
            bridge,
            state: StdMutex::new(SessionState::Created),
        };
        session.set_state(SessionState::Ready);
        Ok(session)
    }

    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Submit program text for evaluation inside this session's runtime.
    ///
    /// The session is `Executing` while the future is in flight. Dropping
    /// the future abandons the evaluation at the bridge boundary; callers
    /// that do so must [`close`](Self::close) the session, never reuse it.
    pub async fn evaluate(&self, source: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.guard_open()?;
        self.set_state(SessionState::Executing);
        let result = self.bridge.evaluate(source, args).await;
        self.set_state_unless_closed(SessionState::Ready);
        result
    }

    /// Install a host callback in this session's runtime.
    pub async fn expose(
        &self,
        name: &str,
        handler: Arc<dyn HostCallback>,
    ) -> Result<(), BridgeError> {
        self.guard_open()?;
        self.bridge.expose_function(name, handler).await
    }

    /// Execute one typed filesystem request; one bridge round trip.
    pub async fn fs(&self, request: FsRequest) -> Result<FsResponse, BridgeError> {
        self.guard_open()?;
        self.bridge.fs(request).await
    }

    /// Tear the session down and release the runtime. Idempotent,
    /// infallible, safe on every exit path including cancellation.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.bridge.shutdown().await;
        debug!(session = self.id, "sandbox session closed");
    }

    fn guard_open(&self) -> Result<(), BridgeError> {
        if self.state() == SessionState::Closed {
            Err(BridgeError::Closed)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn set_state_unless_closed(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != SessionState::Closed {
            *state = next;
        }
    }
}

/// A small pool of warm, disposable sessions.
///
/// `acquire` hands out a warm session when one is available and launches a
/// cold one otherwise. Sessions are never put back: the fresh-state
/// guarantee holds because every execution still gets a runtime no prior
/// execution has touched. Capacity is advisory under concurrent prewarming.
pub struct SessionPool {
    launcher: Arc<dyn BridgeLauncher>,
    warm: Mutex<VecDeque<SandboxSession>>,
    capacity: usize,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    /// Pool launching through `launcher`, holding up to `capacity` warm
    /// sessions. A capacity of zero disables warming entirely.
    pub fn new(launcher: Arc<dyn BridgeLauncher>, capacity: usize) -> Self {
        Self {
            launcher,
            warm: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Take a session: warm if available, freshly launched otherwise.
    pub async fn acquire(&self) -> Result<SandboxSession, BridgeError> {
        if let Some(session) = self.warm.lock().await.pop_front() {
            trace!(session = session.id(), "reusing warm session slot");
            return Ok(session);
        }
        SandboxSession::open(self.launcher.as_ref()).await
    }

    /// Open sessions until the pool holds `capacity` warm ones.
    pub async fn prewarm(&self) -> Result<usize, BridgeError> {
        let mut opened = 0;
        loop {
            if self.warm.lock().await.len() >= self.capacity {
                return Ok(opened);
            }
            let session = SandboxSession::open(self.launcher.as_ref()).await?;
            self.warm.lock().await.push_back(session);
            opened += 1;
        }
    }

    /// Close every warm session and empty the pool.
    pub async fn drain(&self) {
        let sessions: Vec<_> = self.warm.lock().await.drain(..).collect();
        for session in sessions {
            session.close().await;
        }
    }

    /// Configured warm capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of warm sessions currently held.
    pub async fn warm_count(&self) -> usize {
        self.warm.lock().await.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bridge::local::LocalLauncher;

    #[tokio::test]
    async fn open_close_lifecycle() {
        let launcher = LocalLauncher::new();
        let session = SandboxSession::open(&launcher).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        // Idempotent.
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn closed_session_rejects_work() {
        let launcher = LocalLauncher::new();
        let session = SandboxSession::open(&launcher).await.unwrap();
        session.close().await;
        assert!(matches!(
            session
                .fs(FsRequest::MakeDir {
                    path: "/d".to_string()
                })
                .await,
            Err(BridgeError::Closed)
        ));
        assert!(matches!(
            session.evaluate("1", Vec::new()).await,
            Err(BridgeError::Closed)
        ));
    }

    #[tokio::test]
    async fn session_ids_are_unique() {
        let launcher = LocalLauncher::new();
        let a = SandboxSession::open(&launcher).await.unwrap();
        let b = SandboxSession::open(&launcher).await.unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn pool_hands_out_warm_sessions_first() {
        let pool = SessionPool::new(Arc::new(LocalLauncher::new()), 2);
        assert_eq!(pool.prewarm().await.unwrap(), 2);
        assert_eq!(pool.warm_count().await, 2);

        let warm = pool.acquire().await.unwrap();
        assert_eq!(pool.warm_count().await, 1);
        let warm_id = warm.id();

        // Cold path once the warm ones run out.
        let _second = pool.acquire().await.unwrap();
        let cold = pool.acquire().await.unwrap();
        assert_eq!(pool.warm_count().await, 0);
        assert!(cold.id() > warm_id);

        pool.drain().await;
    }

    #[tokio::test]
    async fn pool_sessions_have_independent_stores() {
        let pool = SessionPool::new(Arc::new(LocalLauncher::new()), 2);
        pool.prewarm().await.unwrap();
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();

        a.fs(FsRequest::MakeDir {
            path: "/only-in-a".to_string(),
        })
        .await
        .unwrap();
        let listing = b
            .fs(FsRequest::List {
                path: "/".to_string(),
                recursive: false,
                info: false,
            })
            .await
            .unwrap();
        assert_eq!(
            listing,
            FsResponse::Listing {
                listing: crate::vfs::Listing::Names(Vec::new())
            }
        );
    }
}
