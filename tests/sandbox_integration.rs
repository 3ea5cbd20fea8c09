//! End-to-end flows over the local runtime: executions, host callbacks,
//! the command surface, and pool behavior under failure.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use coral::{
    Bridge, BridgeError, BridgeLauncher, CodeExecutor, CommandInterpreter, EvalCall,
    ExecutionRequest, LocalBridge, LocalLauncher, SandboxSession,
};

/// Launcher that counts how many runtimes it actually started.
struct CountingLauncher {
    launches: AtomicUsize,
}

impl CountingLauncher {
    fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
        }
    }

    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BridgeLauncher for CountingLauncher {
    async fn launch(&self) -> Result<Arc<dyn Bridge>, BridgeError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LocalBridge::new()))
    }
}

/// Launcher whose runtimes never come up.
struct BrokenLauncher;

#[async_trait]
impl BridgeLauncher for BrokenLauncher {
    async fn launch(&self) -> Result<Arc<dyn Bridge>, BridgeError> {
        Err(BridgeError::Unavailable("runtime image missing".to_string()))
    }
}

async fn open_session() -> SandboxSession {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    SandboxSession::open(&LocalLauncher::new()).await.unwrap()
}

#[tokio::test]
async fn command_surface_round_trips_content() {
    let session = open_session().await;
    let shell = CommandInterpreter::new(&session);

    assert_eq!(
        shell.run(r#""Hello" > put /greeting.txt"#).await,
        json!(true)
    );
    assert_eq!(
        shell.run(r#"", World!" >> put /greeting.txt"#).await,
        json!(true)
    );
    assert_eq!(shell.run("get /greeting.txt").await, json!("Hello, World!"));

    session.close().await;
}

#[tokio::test]
async fn mkdir_conflicts_where_copy_converges() {
    let session = open_session().await;
    let shell = CommandInterpreter::new(&session);

    shell.run("mkdir /data").await;
    let conflict = shell.run("mkdir /data").await;
    assert_eq!(
        conflict,
        json!({"error": "Error creating directory /data: File exists"})
    );

    shell.run(r#""payload" > put /data/file.txt"#).await;
    shell.run("mkdir /backup").await;
    // Copying onto an existing directory succeeds; only mkdir insists on
    // a fresh name.
    assert_eq!(shell.run("cp -r /data /backup").await, json!(true));
    assert_eq!(shell.run("cp -r /data /backup").await, json!(true));
    assert_eq!(shell.run("get /backup/file.txt").await, json!("payload"));

    session.close().await;
}

#[tokio::test]
async fn recursive_info_listing_descends_three_levels() {
    let session = open_session().await;
    let shell = CommandInterpreter::new(&session);

    shell.run("mkdir /a").await;
    shell.run("mkdir /a/b").await;
    shell.run("mkdir /a/b/c").await;
    shell.run(r#""deep" > put /a/b/c/leaf.txt"#).await;

    assert_eq!(
        shell.run("ls -r -info /").await,
        json!([{
            "name": "a",
            "type": "dir",
            "size": null,
            "children": [{
                "name": "b",
                "type": "dir",
                "size": null,
                "children": [{
                    "name": "c",
                    "type": "dir",
                    "size": null,
                    "children": [{
                        "name": "leaf.txt",
                        "type": "file",
                        "size": 4
                    }]
                }]
            }]
        }])
    );

    // Option order never changes the result.
    assert_eq!(
        shell.run("ls -r -info /").await,
        shell.run("ls -info -r /").await
    );

    session.close().await;
}

#[tokio::test]
async fn copied_tree_lists_identically_to_source() {
    let session = open_session().await;
    let shell = CommandInterpreter::new(&session);

    shell.run("mkdir /src").await;
    shell.run("mkdir /src/nested").await;
    shell.run(r#""one" > put /src/a.txt"#).await;
    shell.run(r#""two" > put /src/nested/b.txt"#).await;

    assert_eq!(shell.run("cp /src /dst").await, json!(true));
    assert_eq!(
        shell.run("ls -r /src").await,
        shell.run("ls -r /dst").await
    );
    assert_eq!(
        shell.run("ls -r /dst").await,
        json!({"a.txt": "file", "nested": {"b.txt": "file"}})
    );

    session.close().await;
}

#[tokio::test]
async fn unknown_verb_reports_parse_failure_as_data() {
    let session = open_session().await;
    let shell = CommandInterpreter::new(&session);

    let report = shell.run("dir /new/folder").await;
    assert_eq!(report["input"], json!("dir /new/folder"));
    assert!(!report["error"].as_str().unwrap().is_empty());

    session.close().await;
}

#[tokio::test]
async fn preflight_rejection_never_starts_a_runtime() {
    let launcher = Arc::new(CountingLauncher::new());
    let executor = CodeExecutor::with_pool(Arc::new(coral::SessionPool::new(
        Arc::clone(&launcher) as Arc<dyn BridgeLauncher>,
        0,
    )));

    let result = executor
        .execute(ExecutionRequest::new("def broken(:\n    pass\n"))
        .await
        .unwrap();
    assert!(result.error().unwrap().starts_with("SyntaxError:"));
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn launch_failure_is_reported_not_raised() {
    let executor = CodeExecutor::new(Arc::new(BrokenLauncher));
    let result = executor
        .execute(ExecutionRequest::new("print('unreachable')"))
        .await
        .unwrap();
    assert_eq!(
        result.error().unwrap(),
        "BridgeUnavailable: isolated runtime unavailable: runtime image missing"
    );
}

#[tokio::test(start_paused = true)]
async fn overrunning_execution_times_out_and_closes_its_session() {
    let launcher = LocalLauncher::with_evaluator(|_call: EvalCall| async move {
        tokio::time::sleep(Duration::from_secs(600)).await;
        Ok(Value::Null)
    });
    let executor = CodeExecutor::new(Arc::new(launcher));

    let result = executor
        .execute(
            ExecutionRequest::new("while True: pass").with_timeout(Duration::from_secs(30)),
        )
        .await
        .unwrap();
    assert!(result.error().unwrap().starts_with("TimeoutError:"));

    // The executor stays usable for the next request.
    let next = executor
        .execute(ExecutionRequest::new("x = 1").with_timeout(Duration::from_secs(30)))
        .await
        .unwrap();
    assert!(next.error().unwrap().starts_with("TimeoutError:"));
}

#[tokio::test]
async fn host_callback_round_trip_preserves_values() {
    let launcher = LocalLauncher::with_evaluator(|call: EvalCall| async move {
        let reply = call
            .guest
            .call_host("send_message", json!({"n": 41, "tag": "probe"}))
            .await
            .map_err(|e| coral::RuntimeFault::new("CallbackError", e.to_string()))?;
        call.guest.stdout().println(&reply.to_string());
        Ok(Value::Null)
    });
    let executor = CodeExecutor::new(Arc::new(launcher));
    executor.register_callback("send_message", |message: Value| async move {
        assert_eq!(message, json!({"n": 41, "tag": "probe"}));
        Ok(json!({"reply": "Message received", "original": message}))
    });

    let result = executor
        .execute(ExecutionRequest::new("send_message({'n': 41})"))
        .await
        .unwrap();
    let output: Value = serde_json::from_str(result.output().unwrap().trim()).unwrap();
    assert_eq!(
        output,
        json!({"reply": "Message received", "original": {"n": 41, "tag": "probe"}})
    );
}

#[tokio::test]
async fn sessions_are_never_reused_across_executions() {
    let launcher = Arc::new(CountingLauncher::new());
    let executor = CodeExecutor::with_pool(Arc::new(coral::SessionPool::new(
        Arc::clone(&launcher) as Arc<dyn BridgeLauncher>,
        0,
    )));

    for _ in 0..3 {
        let result = executor
            .execute(ExecutionRequest::new("x = 1"))
            .await
            .unwrap();
        // The local runtime has no evaluator installed; the fault proves
        // the code reached a live runtime.
        assert!(result.error().is_some());
    }
    assert_eq!(launcher.launches(), 3);
}

#[tokio::test]
async fn confirmed_execution_tags_are_unique_per_run() {
    let launcher = LocalLauncher::with_evaluator(|call: EvalCall| async move {
        call.guest.stdout().print("ok");
        Ok(Value::Null)
    });
    let executor = CodeExecutor::new(Arc::new(launcher));

    let first = executor
        .execute_confirmed(ExecutionRequest::new("print('ok')"))
        .await
        .unwrap();
    let second = executor
        .execute_confirmed(ExecutionRequest::new("print('ok')"))
        .await
        .unwrap();

    assert!(first.starts_with(r#"{"success":true,"output":"ok"}"#));
    assert!(first.contains("Code Execution Confirmation: "));
    assert_ne!(first, second);
}
