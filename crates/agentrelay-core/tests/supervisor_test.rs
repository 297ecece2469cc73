#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use agentrelay_core::config::{RuntimeOptions, WorkerCommand};
use agentrelay_core::runtime::{
    ExitPhase, RuntimeEvent, RuntimeStatus, RuntimeSupervisor, StartOutcome, SupervisorError,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

const TIMEOUT: Duration = Duration::from_secs(10);

/// A worker script run through `sh`, which receives `--host H --port P`.
fn worker(dir: &TempDir, name: &str, body: &str) -> WorkerCommand {
    let path: PathBuf = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    WorkerCommand::new("sh").with_entrypoint(path)
}

fn options(port: u16) -> RuntimeOptions {
    RuntimeOptions {
        port,
        ..RuntimeOptions::default()
    }
}

async fn next_exit(events: &mut broadcast::Receiver<RuntimeEvent>) -> RuntimeEvent {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.unwrap();
            if matches!(event, RuntimeEvent::Exited { .. }) {
                return event;
            }
        }
    })
    .await
    .expect("worker did not exit")
}

async fn collect_until_ready(events: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
    tokio::time::timeout(TIMEOUT, async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            let done = matches!(event, RuntimeEvent::Ready { .. });
            seen.push(event);
            if done {
                return seen;
            }
        }
    })
    .await
    .expect("worker never became ready")
}

#[tokio::test]
async fn readiness_split_across_writes_then_graceful_stop() {
    let dir = TempDir::new().unwrap();
    let supervisor = RuntimeSupervisor::new(worker(
        &dir,
        "worker.sh",
        r#"echo "booting on $2"
echo "warming up" >&2
printf 'AGENTRELAY RE'
sleep 0.2
echo "ADY $4"
exec sleep 30
"#,
    ));
    let mut events = supervisor.subscribe();

    let outcome = supervisor.start(options(6123)).await.unwrap();
    assert!(matches!(outcome, StartOutcome::Started { pid: Some(_) }));
    assert_eq!(
        supervisor.start(options(6123)).await.unwrap(),
        StartOutcome::AlreadyRunning
    );

    assert_eq!(
        supervisor.wait_ready(TIMEOUT).await.unwrap(),
        ("127.0.0.1".to_string(), 6123)
    );

    let seen = collect_until_ready(&mut events).await;
    let logs: Vec<&str> = seen
        .iter()
        .filter_map(|e| match e {
            RuntimeEvent::Log { line } => Some(line.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(logs, vec!["booting on 127.0.0.1", "AGENTRELAY READY 6123"]);
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, RuntimeEvent::Ready { .. }))
            .count(),
        1
    );

    assert!(supervisor.stop().await.unwrap());
    assert!(!supervisor.stop().await.unwrap());
    assert_eq!(supervisor.status(), RuntimeStatus::Stopped);

    match next_exit(&mut events).await {
        RuntimeEvent::Exited { signal, phase, .. } => {
            assert_eq!(signal, Some(15));
            assert_eq!(phase, ExitPhase::AfterReady);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!supervisor.is_ready());
}

#[tokio::test]
async fn exit_before_readiness_is_reported_as_such() {
    let dir = TempDir::new().unwrap();
    let supervisor = RuntimeSupervisor::new(worker(
        &dir,
        "crash.sh",
        "echo 'missing dependency' >&2\nexit 3\n",
    ));
    let mut events = supervisor.subscribe();

    supervisor.start(options(6124)).await.unwrap();

    let err = supervisor.wait_ready(TIMEOUT).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::ExitedBeforeReady {
            code: Some(3),
            signal: None
        }
    ));

    let mut saw_stderr = false;
    let exit = tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await.unwrap() {
                RuntimeEvent::ErrorLog { chunk } => {
                    saw_stderr |= chunk.contains("missing dependency");
                }
                event @ RuntimeEvent::Exited { .. } => return event,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert!(saw_stderr);
    assert_eq!(
        exit,
        RuntimeEvent::Exited {
            code: Some(3),
            signal: None,
            phase: ExitPhase::BeforeReady
        }
    );
    assert!(matches!(
        supervisor.status(),
        RuntimeStatus::Exited {
            phase: ExitPhase::BeforeReady,
            ..
        }
    ));

    // No automatic restart, but a manual one is allowed.
    assert!(matches!(
        supervisor.start(options(6124)).await.unwrap(),
        StartOutcome::Started { .. }
    ));
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn unusable_port_falls_back_to_the_configured_one() {
    let dir = TempDir::new().unwrap();
    let supervisor = RuntimeSupervisor::new(worker(
        &dir,
        "worker.sh",
        "echo 'AGENTRELAY READY abc'\nexec sleep 30\n",
    ));

    supervisor.start(options(6125)).await.unwrap();
    assert_eq!(
        supervisor.wait_ready(TIMEOUT).await.unwrap(),
        ("127.0.0.1".to_string(), 6125)
    );
    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn a_previous_worker_exiting_does_not_touch_the_new_one() {
    let dir = TempDir::new().unwrap();
    // Ignores SIGTERM for a moment so its exit lands after the restart.
    let supervisor = RuntimeSupervisor::new(worker(
        &dir,
        "worker.sh",
        r#"trap 'sleep 0.5; exit 0' TERM
echo "AGENTRELAY READY $4"
while true; do sleep 0.1; done
"#,
    ));
    let mut events = supervisor.subscribe();

    supervisor.start(options(6126)).await.unwrap();
    supervisor.wait_ready(TIMEOUT).await.unwrap();

    supervisor.stop().await.unwrap();
    supervisor.start(options(6127)).await.unwrap();
    assert_eq!(
        supervisor.wait_ready(TIMEOUT).await.unwrap(),
        ("127.0.0.1".to_string(), 6127)
    );

    // The first worker's exit still gets reported...
    assert!(matches!(
        next_exit(&mut events).await,
        RuntimeEvent::Exited {
            phase: ExitPhase::AfterReady,
            ..
        }
    ));
    // ...but the new worker stays ready.
    assert_eq!(
        supervisor.status(),
        RuntimeStatus::Ready {
            host: "127.0.0.1".to_string(),
            port: 6127
        }
    );

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn missing_executable_is_a_spawn_failure() {
    let supervisor = RuntimeSupervisor::new(WorkerCommand::new("/nonexistent/agentrelay-worker"));
    let err = supervisor.start(options(6128)).await.unwrap_err();
    assert!(err.is_spawn_failure());
    assert_eq!(supervisor.status(), RuntimeStatus::Stopped);
}
