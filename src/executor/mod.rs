//! Executor: composes the Command Runner, Image Provisioner, Syscall Policy
//! Store, Container Supervisor, and Resource Sampler into the end-to-end
//! sequence that runs one [`Task`](crate::task::Task) to a
//! [`TaskResult`](crate::task::TaskResult).
//!
//! The sequence (`spec.md` §4.6):
//! 1. Validate nonce format; reject empty.
//! 2. Reject an empty image name.
//! 3. Under `setup_timeout`, provision the image.
//! 4. Resolve `work_dir` and assemble the environment.
//! 5. Create, then start, the container under the same `setup_timeout`.
//! 6. Register deferred, unconditional container removal.
//! 7. Verify security under an independent 120-second budget.
//! 8. Open `execution_timeout`, start the sampler, wait for exit.
//! 9. Distinguish a natural exit from a graceful timeout stop.
//! 10. Under a fresh `setup_timeout` scope, fetch logs.
//! 11. Snapshot sampler counters.
//! 12. Return the result.

mod config;
mod resources;

pub use config::ExecutorConfig;
pub use resources::detect_cpu_base_ghz;

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::container::{ContainerError, ContainerSupervisor, WaitOutcome};
use crate::image::{ImageProvisioner, ProvisionError};
use crate::runner::CommandRunner;
use crate::sampler::ResourceSampler;
use crate::task::{Task, TaskResult};

/// Independent budget for `verify_security`, per `spec.md` §4.4 — deliberately
/// not derived from `setup_timeout` or `execution_timeout`.
const SECURITY_VERIFICATION_BUDGET: Duration = Duration::from_secs(120);

/// Deadline used for the final, best-effort container removal. Not truly
/// unbounded (the runner always requires a deadline), but generous enough
/// that it is never the limiting factor in practice.
const CLEANUP_DEADLINE: Duration = Duration::from_secs(30);

/// Typed classification of the ways a task can fail before a [`TaskResult`]
/// is produced. `Executor::execute_task` never returns this directly — it is
/// folded into `TaskResult::error` — but it gives callers that want to branch
/// on failure kind something sturdier than string matching.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid_input: {0}")]
    InvalidInput(String),
    #[error("provisioning_failed: {0}")]
    ProvisioningFailed(#[from] ProvisionError),
    #[error("supervisor_failed: {0}")]
    SupervisorFailed(#[from] ContainerError),
    #[error("security_failed: {0}")]
    SecurityFailed(String),
    #[error("nonce_verification_failed")]
    NonceMismatch,
}

/// Matches `<unix-seconds>-<suffix>`, the non-hex nonce shape: a signed
/// integer prefix, a separating hyphen, and a non-empty suffix.
fn timestamp_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^-?\d+-\S+$").unwrap())
}

/// Accepts either a bare hex string, or `<unix-seconds>-<suffix>` where the
/// prefix parses as an `i64`. Rejects the empty string outright.
fn validate_nonce(nonce: &str) -> Result<(), String> {
    if nonce.is_empty() {
        return Err("nonce must not be empty".to_string());
    }
    if nonce.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(());
    }
    if timestamp_suffix_pattern().is_match(nonce) {
        let prefix = nonce.split('-').next().unwrap_or_default();
        if prefix.parse::<i64>().is_ok() {
            return Ok(());
        }
    }
    Err(format!("nonce {nonce:?} is neither hex nor <unix-seconds>-<suffix>"))
}

/// Runs tasks end-to-end. One instance is typically shared (via `&self`,
/// which carries no exclusive state) across many concurrent
/// [`execute_task`](Self::execute_task) calls; each call owns its own
/// [`ContainerSupervisor`] and [`ResourceSampler`].
pub struct Executor {
    command_runner: CommandRunner,
    provisioner: ImageProvisioner,
    policy_path: PathBuf,
    config: ExecutorConfig,
    cpu_base_ghz: f64,
}

impl Executor {
    /// Build an executor bound to a container tool (`"docker"`, typically)
    /// and a [`crate::policy::PolicyStore`] path. The CPU base frequency is
    /// detected once here, not per task.
    pub fn new(config: ExecutorConfig, policy_path: PathBuf) -> Self {
        let command_runner = CommandRunner::new("docker");
        let provisioner = ImageProvisioner::new(command_runner.clone());
        let cpu_base_ghz = detect_cpu_base_ghz();
        Self { command_runner, provisioner, policy_path, config, cpu_base_ghz }
    }

    /// Run one task to completion. Always returns a [`TaskResult`]; failures
    /// at any stage are folded into its `error` field rather than surfaced as
    /// a `Result::Err`, so a caller always gets a record to persist.
    pub async fn execute_task(&self, task: &Task, cancel: &CancellationToken) -> TaskResult {
        if let Err(msg) = validate_nonce(&task.nonce) {
            return TaskResult::failed(task.id, ExecutorError::InvalidInput(msg).to_string());
        }
        if task.config.image_name.trim().is_empty() {
            return TaskResult::failed(
                task.id,
                ExecutorError::InvalidInput("image_name must not be empty".to_string()).to_string(),
            );
        }

        if let Err(err) = self
            .provisioner
            .ensure(
                &task.config.image_name,
                task.config.image_archive_url.as_deref(),
                self.config.setup_timeout,
                cancel,
            )
            .await
        {
            return TaskResult::failed(task.id, ExecutorError::from(err).to_string());
        }

        let mut supervisor = ContainerSupervisor::new(self.command_runner.clone(), self.policy_path.clone());
        let result = self.run_supervised(task, &mut supervisor, cancel).await;

        // Step 6: unconditional, best-effort removal on every exit path, on
        // a deadline independent of whatever budget the failure above ran
        // out of.
        let cleanup_cancel = CancellationToken::new();
        if let Err(err) = supervisor.remove(CLEANUP_DEADLINE, &cleanup_cancel).await {
            warn!(task_id = %task.id, %err, "deferred container removal failed");
        }

        result
    }

    async fn run_supervised(
        &self,
        task: &Task,
        supervisor: &mut ContainerSupervisor,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let work_dir = task.resolve_work_dir().to_string();
        let env = task.env_list();

        if let Err(err) = supervisor
            .create(
                &task.config.image_name,
                &task.config.command,
                &work_dir,
                &env,
                &self.config.memory_limit,
                self.config.cpu_quota,
                self.config.setup_timeout,
                cancel,
            )
            .await
        {
            return TaskResult::failed(task.id, ExecutorError::from(err).to_string());
        }

        if let Err(err) = supervisor.start(self.config.setup_timeout, cancel).await {
            return TaskResult::failed(task.id, ExecutorError::from(err).to_string());
        }

        let verification = supervisor.verify_security(SECURITY_VERIFICATION_BUDGET, cancel).await;
        let mut security_warning = None;
        if !verification.ok && !verification.timed_out {
            return TaskResult::failed(
                task.id,
                ExecutorError::SecurityFailed(verification.message).to_string(),
            );
        }
        if verification.timed_out {
            warn!(task_id = %task.id, message = %verification.message, "security verification demoted to warning");
            security_warning = Some(verification.message);
        }

        let container_id = supervisor.handle().map(|h| h.id.clone()).unwrap_or_default();
        let mut sampler = ResourceSampler::new(self.command_runner.clone(), container_id, self.cpu_base_ghz);
        if let Err(err) = sampler.start(cancel.clone()) {
            warn!(task_id = %task.id, %err, "failed to start resource sampler");
        }

        info!(task_id = %task.id, "executing task");
        let wait_outcome = supervisor.wait(self.config.execution_timeout, cancel).await;

        let _ = sampler.stop().await;
        let resources = sampler.metrics().await;

        let (exit_code, mut error, graceful_timeout) = match wait_outcome {
            Ok(WaitOutcome::Exited(code)) => {
                let note = if code == 255 {
                    Some("container exited 255: a syscall may have been blocked by policy".to_string())
                } else {
                    None
                };
                (code, note, false)
            }
            Ok(WaitOutcome::TimedOut(_)) => (
                -1,
                Some(format!(
                    "task execution exceeded timeout of {:?} and was gracefully stopped",
                    self.config.execution_timeout
                )),
                true,
            ),
            Err(err) => (-1, Some(ExecutorError::from(err).to_string()), false),
        };

        let logs = match supervisor.logs(self.config.setup_timeout, cancel).await {
            Ok(text) => text,
            Err(err) => {
                let message = ExecutorError::from(err).to_string();
                if graceful_timeout {
                    return TaskResult {
                        task_id: task.id,
                        exit_code,
                        output: format!("NONCE: {}\n", task.nonce),
                        error: Some(message),
                        graceful_timeout,
                        security_warning,
                        resources,
                    };
                }
                return TaskResult::failed(task.id, message);
            }
        };

        let output = format!("NONCE: {}\n{}", task.nonce, logs);

        if !ContainerSupervisor::verify_nonce(&output, &task.nonce) {
            if graceful_timeout {
                error.get_or_insert_with(|| "nonce not found in output after graceful timeout".to_string());
            } else {
                return TaskResult {
                    task_id: task.id,
                    exit_code,
                    output,
                    error: Some(ExecutorError::NonceMismatch.to_string()),
                    graceful_timeout,
                    security_warning,
                    resources,
                };
            }
        }

        TaskResult { task_id: task.id, exit_code, output, error, graceful_timeout, security_warning, resources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_accepts_plain_hex() {
        assert!(validate_nonce("deadbeef").is_ok());
    }

    #[test]
    fn nonce_accepts_timestamp_suffix_form() {
        assert!(validate_nonce("1700000000-abc123").is_ok());
    }

    #[test]
    fn nonce_rejects_empty() {
        assert!(validate_nonce("").is_err());
    }

    #[test]
    fn nonce_rejects_non_integer_prefix() {
        assert!(validate_nonce("not-a-number-suffix").is_err());
    }

    #[test]
    fn nonce_rejects_dangling_hyphen() {
        assert!(validate_nonce("-abc").is_err());
        assert!(validate_nonce("123-").is_err());
    }

    #[test]
    fn graceful_timeout_message_matches_spec_wording() {
        let message = format!(
            "task execution exceeded timeout of {:?} and was gracefully stopped",
            Duration::from_secs(2)
        );
        assert_eq!(message, "task execution exceeded timeout of 2s and was gracefully stopped");
    }

    #[tokio::test]
    async fn empty_image_name_fails_before_any_provisioning() {
        let executor = Executor::new(ExecutorConfig::default(), PathBuf::from("/nonexistent/policy.json"));
        let task = Task {
            id: uuid::Uuid::new_v4(),
            nonce: "deadbeef".to_string(),
            config: crate::task::TaskConfig {
                image_name: String::new(),
                image_archive_url: None,
                command: vec![],
                work_dir: None,
            },
            environment: Default::default(),
        };
        let result = executor.execute_task(&task, &CancellationToken::new()).await;
        assert_eq!(result.exit_code, -1);
        assert!(result.error.unwrap().contains("invalid_input"));
    }

    #[tokio::test]
    async fn invalid_nonce_fails_before_any_provisioning() {
        let executor = Executor::new(ExecutorConfig::default(), PathBuf::from("/nonexistent/policy.json"));
        let task = Task {
            id: uuid::Uuid::new_v4(),
            nonce: String::new(),
            config: crate::task::TaskConfig {
                image_name: "alpine:latest".to_string(),
                image_archive_url: None,
                command: vec![],
                work_dir: None,
            },
            environment: Default::default(),
        };
        let result = executor.execute_task(&task, &CancellationToken::new()).await;
        assert_eq!(result.exit_code, -1);
        assert!(result.error.unwrap().contains("invalid_input"));
    }
}
