//! Code execution coordinator.
//!
//! [`CodeExecutor`] turns one piece of program text into one
//! [`ExecutionResult`]: strip code fences, preflight the source, take a
//! fresh session from the pool, expose the registered host callbacks,
//! evaluate under a deadline, and tear the session down on every exit
//! path. Faults of the program itself come back as `Failure` values;
//! only the transport to the runtime can surface as `Err`.

use std::sync::Arc;
use std::time::Duration;

use serde::ser::{Serialize, SerializeStruct, Serializer};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::{BridgeError, BridgeLauncher};
use crate::callback::{CallbackRegistry, HostCallback};
use crate::preflight::{format_source, strip_code_fences};
use crate::session::{SandboxSession, SessionPool};
use crate::wire::EvalEnvelope;

/// Default wall-clock deadline for one execution.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One piece of program text with its execution deadline.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Program text, possibly wrapped in Markdown code fences.
    pub source: String,
    /// Wall-clock deadline for the run.
    pub timeout: Duration,
}

impl ExecutionRequest {
    /// Request with the default deadline.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Outcome of one execution.
///
/// Serializes to the two-field wire shape consumed by agent frontends:
/// `{"success": true, "output": …}` or `{"success": false, "error": …}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The program ran to completion; `output` is its captured stdout.
    Success {
        /// Captured standard output, possibly empty.
        output: String,
    },
    /// The program was rejected or faulted; `error` names the fault.
    Failure {
        /// Human-readable fault, prefixed with its kind.
        error: String,
    },
}

impl ExecutionResult {
    /// True for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Captured output, when successful.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Success { output } => Some(output),
            Self::Failure { .. } => None,
        }
    }

    /// Fault message, when failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }
}

impl Serialize for ExecutionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ExecutionResult", 2)?;
        match self {
            Self::Success { output } => {
                s.serialize_field("success", &true)?;
                s.serialize_field("output", output)?;
            }
            Self::Failure { error } => {
                s.serialize_field("success", &false)?;
                s.serialize_field("error", error)?;
            }
        }
        s.end()
    }
}

/// Coordinates sandboxed executions over a pool of disposable sessions.
pub struct CodeExecutor {
    pool: Arc<SessionPool>,
    callbacks: CallbackRegistry,
}

impl std::fmt::Debug for CodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeExecutor")
            .field("pool", &self.pool)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

impl CodeExecutor {
    /// Executor over `launcher` with a single warm-session slot.
    pub fn new(launcher: Arc<dyn BridgeLauncher>) -> Self {
        Self::with_pool(Arc::new(SessionPool::new(launcher, 1)))
    }

    /// Executor over an existing pool.
    pub fn with_pool(pool: Arc<SessionPool>) -> Self {
        Self {
            pool,
            callbacks: CallbackRegistry::new(),
        }
    }

    /// The callback registry exposed on every session.
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Register a host callback under `name` for all future executions.
    pub fn register_callback(&self, name: impl Into<String>, handler: impl HostCallback + 'static) {
        self.callbacks.register(name, handler);
    }

    /// Run one piece of program text in a fresh session.
    ///
    /// Preflight rejections, launch failures, runtime faults, and
    /// deadline overruns all come back as [`ExecutionResult::Failure`];
    /// `Err` is reserved for the transport breaking mid-call.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, BridgeError> {
        let source = match format_source(&strip_code_fences(&request.source)) {
            Ok(source) => source,
            Err(e) => {
                debug!(error = %e, "rejecting source at preflight");
                return Ok(ExecutionResult::Failure {
                    error: format!("{e}\nBe sure your indentation is correct."),
                });
            }
        };

        let session = match self.pool.acquire().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "sandbox launch failed");
                return Ok(ExecutionResult::Failure {
                    error: format!("BridgeUnavailable: {e}"),
                });
            }
        };

        let result = self.run(&session, &source, request.timeout).await;
        session.close().await;
        self.top_up();
        result
    }

    /// Run one execution and append a one-time confirmation tag to its
    /// serialized result, for transcripts where tool output must be
    /// distinguishable from program output that merely imitates it.
    pub async fn execute_confirmed(&self, request: ExecutionRequest) -> Result<String, BridgeError> {
        let result = self.execute(request).await?;
        let body = serde_json::to_string(&result)
            .map_err(|e| BridgeError::Marshal(e.to_string()))?;
        Ok(format!(
            "{body}\nCode Execution Confirmation: {}.\n",
            confirmation_id()
        ))
    }

    async fn run(
        &self,
        session: &SandboxSession,
        source: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, BridgeError> {
        for (name, handler) in self.callbacks.snapshot() {
            session.expose(&name, handler).await?;
        }

        let value = match tokio::time::timeout(timeout, session.evaluate(source, Vec::new())).await
        {
            Err(_elapsed) => {
                warn!(session = session.id(), ?timeout, "execution deadline exceeded");
                return Ok(ExecutionResult::Failure {
                    error: format!("TimeoutError: execution exceeded {timeout:?}."),
                });
            }
            Ok(result) => result?,
        };

        let envelope: EvalEnvelope = serde_json::from_value(value)
            .map_err(|e| BridgeError::Marshal(format!("bad evaluation envelope: {e}")))?;
        Ok(if envelope.success {
            ExecutionResult::Success {
                output: envelope.output.unwrap_or_default(),
            }
        } else {
            ExecutionResult::Failure {
                error: envelope
                    .error
                    .unwrap_or_else(|| "RuntimeError: unspecified failure".to_string()),
            }
        })
    }

    /// Refill the warm pool in the background after a session was spent.
    fn top_up(&self) {
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            if let Err(e) = pool.prewarm().await {
                debug!(error = %e, "pool prewarm failed");
            }
        });
    }
}

fn confirmation_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::bridge::local::{EvalCall, LocalLauncher};
    use crate::wire::RuntimeFault;
    use serde_json::{Value, json};

    fn print_executor() -> CodeExecutor {
        let launcher = LocalLauncher::with_evaluator(|call: EvalCall| async move {
            call.guest.stdout().println(&call.source);
            Ok(Value::Null)
        });
        CodeExecutor::new(Arc::new(launcher))
    }

    #[tokio::test]
    async fn successful_run_captures_output() {
        let executor = print_executor();
        let result = executor
            .execute(ExecutionRequest::new("print('hello')"))
            .await
            .unwrap();
        assert_eq!(result.output(), Some("print('hello')\n\n"));
    }

    #[tokio::test]
    async fn runtime_fault_becomes_failure_value() {
        let launcher = LocalLauncher::with_evaluator(|_call: EvalCall| async move {
            Err(RuntimeFault::new("NameError", "name 'x' is not defined"))
        });
        let executor = CodeExecutor::new(Arc::new(launcher));
        let result = executor.execute(ExecutionRequest::new("x")).await.unwrap();
        assert_eq!(result.error(), Some("NameError: name 'x' is not defined"));
    }

    #[tokio::test]
    async fn preflight_rejection_appends_indentation_hint() {
        let executor = print_executor();
        let result = executor
            .execute(ExecutionRequest::new("x = (1\n"))
            .await
            .unwrap();
        let error = result.error().unwrap();
        assert!(error.starts_with("SyntaxError:"));
        assert!(error.ends_with("Be sure your indentation is correct."));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_overrun_becomes_timeout_failure() {
        let launcher = LocalLauncher::with_evaluator(|_call: EvalCall| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        });
        let executor = CodeExecutor::new(Arc::new(launcher));
        let result = executor
            .execute(ExecutionRequest::new("while True: pass").with_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(result.error().unwrap().starts_with("TimeoutError:"));
    }

    #[tokio::test]
    async fn result_serializes_to_wire_shape() {
        let success = ExecutionResult::Success {
            output: "42\n".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({"success": true, "output": "42\n"})
        );
        let failure = ExecutionResult::Failure {
            error: "ValueError: bad".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({"success": false, "error": "ValueError: bad"})
        );
    }

    #[tokio::test]
    async fn confirmation_tag_is_a_random_uuid() {
        let executor = print_executor();
        let a = executor
            .execute_confirmed(ExecutionRequest::new("print(1)"))
            .await
            .unwrap();
        let b = executor
            .execute_confirmed(ExecutionRequest::new("print(1)"))
            .await
            .unwrap();
        let tag = a
            .split("Code Execution Confirmation: ")
            .nth(1)
            .and_then(|rest| rest.strip_suffix(".\n"))
            .unwrap();
        assert!(Uuid::parse_str(tag).is_ok());
        assert_ne!(a, b);
    }
}
