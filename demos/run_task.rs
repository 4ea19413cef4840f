//! Minimal end-to-end run of the task execution engine against a local
//! `docker` daemon.
//!
//! Run with: `cargo run --example run_task --features <none-needed>`
//! (requires a working `docker` binary on `PATH`).

use task_runner_core::executor::{Executor, ExecutorConfig};
use task_runner_core::policy::PolicyStore;
use task_runner_core::task::{Task, TaskConfig, TaskEnvironment};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let policy = PolicyStore::new()?;
    let executor = Executor::new(ExecutorConfig::default(), policy.path().to_path_buf());

    let task = Task {
        id: uuid::Uuid::new_v4(),
        nonce: "deadbeef".to_string(),
        config: TaskConfig {
            image_name: "alpine:latest".to_string(),
            image_archive_url: None,
            command: vec!["sh".to_string(), "-c".to_string(), "echo $TASK_NONCE".to_string()],
            work_dir: None,
        },
        environment: TaskEnvironment::default(),
    };

    let result = executor.execute_task(&task, &CancellationToken::new()).await;
    println!("exit_code={}", result.exit_code);
    println!("output={}", result.output);
    if let Some(err) = &result.error {
        println!("error={err}");
    }
    println!(
        "cpu_seconds={:.3} memory_gb_hours={:.6}",
        result.resources.cpu_seconds, result.resources.memory_gb_hours
    );

    policy.shutdown();
    Ok(())
}
