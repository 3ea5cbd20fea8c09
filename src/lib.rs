//! Sandboxed code execution over disposable isolated runtimes.
//!
//! `coral` coordinates untrusted program text through a strict pipeline:
//! preflight validation, a fresh single-use sandbox session, host
//! callbacks reachable only by name, a deadline, and guaranteed teardown.
//! Each session carries its own in-memory filesystem, reachable three
//! ways: typed requests over the bridge, the host-side [`VfsClient`], and
//! a line-oriented command language (`ls`, `get`, `put`, ...) meant for
//! agent tool calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use coral::{CodeExecutor, ExecutionRequest, LocalLauncher};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), coral::BridgeError> {
//! let executor = CodeExecutor::new(Arc::new(LocalLauncher::new()));
//! let result = executor.execute(ExecutionRequest::new("print('hi')")).await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod callback;
pub mod command;
pub mod executor;
pub mod preflight;
pub mod session;
pub mod vfs;
pub mod wire;

pub use bridge::local::{EvalCall, Evaluate, GuestHandle, LocalBridge, LocalLauncher};
pub use bridge::{Bridge, BridgeError, BridgeLauncher};
pub use callback::{CallbackError, CallbackRegistry, HostCallback};
pub use command::{Command, CommandInterpreter, ParseError, parse_line};
pub use executor::{CodeExecutor, DEFAULT_TIMEOUT, ExecutionRequest, ExecutionResult};
pub use preflight::{PreflightError, format_source, strip_code_fences};
pub use session::{SandboxSession, SessionPool, SessionState};
pub use vfs::{FsError, FsNode, Listing, NodeKind, TreeNode, VfsClient};
pub use wire::{CallbackReply, EvalEnvelope, FsRequest, FsResponse, RuntimeFault};
