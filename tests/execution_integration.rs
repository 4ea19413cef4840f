//! End-to-end integration tests against a real container runtime.
//!
//! These drive the whole [`Executor`] pipeline — provisioning, creation,
//! security verification, execution, logs, and removal — through an actual
//! `docker` binary. They are `#[ignore]`d by default and `#[serial(docker)]`
//! tagged so `cargo test -- --ignored` runs them one at a time against the
//! shared daemon rather than racing several throwaway containers at once;
//! only run with `cargo test -- --ignored` on a host with Docker available.

use std::path::PathBuf;
use std::time::Duration;

use serial_test::serial;
use task_runner_core::executor::{Executor, ExecutorConfig};
use task_runner_core::policy::PolicyStore;
use task_runner_core::task::{Task, TaskConfig, TaskEnvironment};
use tokio_util::sync::CancellationToken;

fn docker_available() -> bool {
    std::process::Command::new("docker")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn echo_nonce_task(nonce: &str) -> Task {
    Task {
        id: uuid::Uuid::new_v4(),
        nonce: nonce.to_string(),
        config: TaskConfig {
            image_name: "alpine:latest".to_string(),
            image_archive_url: None,
            command: vec!["sh".to_string(), "-c".to_string(), "echo \"$TASK_NONCE\"".to_string()],
            work_dir: None,
        },
        environment: TaskEnvironment::default(),
    }
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
#[serial(docker)]
async fn full_task_executes_and_verifies_nonce() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }

    let policy = PolicyStore::new().expect("policy store");
    let executor = Executor::new(ExecutorConfig::default(), policy.path().to_path_buf());

    let task = echo_nonce_task("deadbeefcafe");
    let result = executor.execute_task(&task, &CancellationToken::new()).await;

    assert_eq!(result.exit_code, 0, "task failed: {:?}", result.error);
    assert!(result.output.starts_with("NONCE: deadbeefcafe\n"));
    assert!(result.output.contains("deadbeefcafe"));
    assert!(result.error.is_none());
    assert!(result.resources.cpu_seconds >= 0.0);

    policy.shutdown();
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
#[serial(docker)]
async fn nonzero_exit_is_reported_without_failing_the_task() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }

    let policy = PolicyStore::new().expect("policy store");
    let executor = Executor::new(ExecutorConfig::default(), policy.path().to_path_buf());

    let mut task = echo_nonce_task("abc123");
    task.config.command = vec!["sh".to_string(), "-c".to_string(), "echo \"$TASK_NONCE\"; exit 7".to_string()];

    let result = executor.execute_task(&task, &CancellationToken::new()).await;
    assert_eq!(result.exit_code, 7);
    assert!(result.output.contains("abc123"));

    policy.shutdown();
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
#[serial(docker)]
async fn blocked_syscall_surfaces_as_exit_255_hint() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }

    let policy = PolicyStore::new().expect("policy store");
    let executor = Executor::new(ExecutorConfig::default(), policy.path().to_path_buf());

    let mut task = echo_nonce_task("feedface01");
    // `ptrace` is in the blocked list; strace itself isn't in the alpine
    // base image, so the nonce-echoing form below is the portable check:
    // a successful run with the policy active at least proves containers
    // came up with a seccomp profile attached without crashing outright.
    task.config.command =
        vec!["sh".to_string(), "-c".to_string(), "echo \"$TASK_NONCE\"; mount -t tmpfs tmpfs /mnt 2>&1; true".to_string()];

    let result = executor.execute_task(&task, &CancellationToken::new()).await;
    assert!(result.output.contains("feedface01"));
    if result.exit_code == 255 {
        assert!(result.error.as_deref().unwrap_or_default().contains("255"));
    }

    policy.shutdown();
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
#[serial(docker)]
async fn execution_timeout_produces_graceful_partial_result() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }

    let policy = PolicyStore::new().expect("policy store");
    let config = ExecutorConfig::default().with_execution_timeout(Duration::from_secs(2));
    let executor = Executor::new(config, policy.path().to_path_buf());

    let mut task = echo_nonce_task("sleepy00");
    task.config.command = vec!["sh".to_string(), "-c".to_string(), "echo \"$TASK_NONCE\"; sleep 60".to_string()];

    let result = executor.execute_task(&task, &CancellationToken::new()).await;
    assert!(result.graceful_timeout, "expected a graceful timeout, got {result:?}");
    assert_eq!(result.exit_code, -1);
    assert!(result.error.is_some());

    policy.shutdown();
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
#[serial(docker)]
async fn image_archive_provisioning_via_http() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }

    // There is no throwaway HTTP archive host to fetch from in CI; this
    // test documents and exercises the failure path instead, confirming a
    // bad archive URL surfaces as a provisioning failure rather than a
    // panic or a hang.
    let policy = PolicyStore::new().expect("policy store");
    let executor = Executor::new(ExecutorConfig::default(), policy.path().to_path_buf());

    let mut task = echo_nonce_task("archive01");
    task.config.image_archive_url = Some("http://127.0.0.1:1/definitely-not-listening.tar".to_string());

    let result = executor.execute_task(&task, &CancellationToken::new()).await;
    assert_eq!(result.exit_code, -1);
    assert!(result.error.unwrap().contains("provisioning_failed"));

    policy.shutdown();
}

#[tokio::test]
#[ignore = "requires a local docker daemon"]
#[serial(docker)]
async fn empty_policy_path_fails_container_creation_not_provisioning() {
    if !docker_available() {
        eprintln!("skipping: docker not available");
        return;
    }

    let executor = Executor::new(ExecutorConfig::default(), PathBuf::from("/nonexistent/seccomp.json"));
    let task = echo_nonce_task("policy001");

    let result = executor.execute_task(&task, &CancellationToken::new()).await;
    assert_eq!(result.exit_code, -1);
    assert!(result.error.unwrap().contains("supervisor_failed"));
}
