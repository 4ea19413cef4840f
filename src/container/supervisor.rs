//! Container Supervisor implementation.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ContainerError, ContainerState, Result};
use crate::runner::{CommandError, CommandRunner};

/// An in-flight or completed container under this supervisor's care.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub state: ContainerState,
}

/// Outcome of [`ContainerSupervisor::wait`].
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    /// The container exited on its own within the deadline.
    Exited(i32),
    /// The deadline elapsed or the caller cancelled; a graceful stop was
    /// attempted. The original command error is preserved for the caller's
    /// diagnostics; the supervisor has already set the container's state to
    /// `Exited` (or left it for the deferred `remove` to force through).
    TimedOut(CommandError),
}

/// Result of [`ContainerSupervisor::verify_security`].
#[derive(Debug, Clone)]
pub struct SecurityVerification {
    pub ok: bool,
    pub message: String,
    /// True when the outcome was driven by the verification budget itself
    /// elapsing rather than a definitive pass/fail — the executor demotes
    /// these to a warning and continues.
    pub timed_out: bool,
}

/// Creates, starts, waits for, logs, stops, and removes exactly one
/// container over its lifetime.
pub struct ContainerSupervisor {
    runner: CommandRunner,
    policy_path: PathBuf,
    handle: Option<ContainerHandle>,
}

impl ContainerSupervisor {
    pub fn new(runner: CommandRunner, policy_path: PathBuf) -> Self {
        Self { runner, policy_path, handle: None }
    }

    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// Build the runtime argv and create the container. The policy path
    /// must exist at call time; a missing policy is a fatal error.
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &mut self,
        image: &str,
        argv: &[String],
        work_dir: &str,
        env: &[String],
        memory_limit: &str,
        cpu_quota: f64,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<&ContainerHandle> {
        if !self.policy_path.exists() {
            return Err(ContainerError::PolicyMissing(self.policy_path.clone()));
        }

        let mut args: Vec<String> = vec![
            "create".to_string(),
            "--memory".to_string(),
            memory_limit.to_string(),
            "--cpus".to_string(),
            format!("{cpu_quota}"),
            "--workdir".to_string(),
            work_dir.to_string(),
        ];
        for entry in env {
            args.push("-e".to_string());
            args.push(entry.clone());
        }
        args.push("--security-opt".to_string());
        args.push("no-new-privileges".to_string());
        args.push("--security-opt".to_string());
        args.push(format!("seccomp={}", self.policy_path.display()));
        args.push(image.to_string());
        args.extend(argv.iter().cloned());

        info!(image, ?argv, "creating container");
        let output = self.runner.run_checked(&args, deadline, cancel).await?;
        let id = output.text.trim().to_string();

        self.handle = Some(ContainerHandle {
            id,
            image: image.to_string(),
            created_at: Utc::now(),
            state: ContainerState::Created,
        });
        Ok(self.handle.as_ref().expect("just set"))
    }

    pub async fn start(&mut self, deadline: Duration, cancel: &CancellationToken) -> Result<()> {
        let id = self.require_id()?.to_string();
        info!(container_id = %id, "starting container");
        self.runner.run_checked(&["start", &id], deadline, cancel).await?;
        if let Some(handle) = self.handle.as_mut() {
            handle.state = ContainerState::Running;
        }
        Ok(())
    }

    /// Wait for the container to exit under `execution_timeout`. On
    /// cancellation or timeout, attempts a graceful `stop -t 9` under its
    /// own 10-second budget before returning; a failed stop is logged and
    /// escalates to the caller's deferred forced removal.
    pub async fn wait(
        &mut self,
        execution_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome> {
        let id = self.require_id()?.to_string();
        match self.runner.run(&["wait", &id], execution_timeout, cancel).await {
            Ok(output) => {
                let exit_code: i32 = output.text.trim().parse().unwrap_or(-1);
                if let Some(handle) = self.handle.as_mut() {
                    handle.state = ContainerState::Exited;
                }
                Ok(WaitOutcome::Exited(exit_code))
            }
            Err(err @ (CommandError::Timeout { .. } | CommandError::Cancelled { .. })) => {
                warn!(container_id = %id, "wait cancelled or timed out, issuing graceful stop");
                let stop_cancel = CancellationToken::new();
                match self
                    .runner
                    .run_checked(&["stop", "-t", "9", &id], Duration::from_secs(10), &stop_cancel)
                    .await
                {
                    Ok(_) => {
                        info!(container_id = %id, "graceful stop succeeded");
                        if let Some(handle) = self.handle.as_mut() {
                            handle.state = ContainerState::Exited;
                        }
                    }
                    Err(stop_err) => {
                        warn!(container_id = %id, %stop_err, "graceful stop failed, forced removal will follow");
                    }
                }
                Ok(WaitOutcome::TimedOut(err))
            }
            Err(other) => Err(ContainerError::Command(other)),
        }
    }

    /// Fetch combined logs, stripping control characters other than `\n`
    /// and `\t`, trimmed of surrounding whitespace.
    pub async fn logs(&self, deadline: Duration, cancel: &CancellationToken) -> Result<String> {
        let id = self.require_id()?;
        let output = self.runner.run_checked(&["logs", id], deadline, cancel).await?;
        Ok(sanitize_output(&output.text))
    }

    /// Send a graceful stop with a timeout-in-seconds argument (minimum 1).
    pub async fn stop(
        &mut self,
        timeout_secs: u32,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let id = self.require_id()?.to_string();
        let secs = timeout_secs.max(1).to_string();
        self.runner.run_checked(&["stop", "-t", &secs, &id], deadline, cancel).await?;
        if let Some(handle) = self.handle.as_mut() {
            handle.state = ContainerState::Exited;
        }
        Ok(())
    }

    /// Force-remove regardless of state. Idempotent: calling this twice,
    /// or when no container was ever created, is a no-op.
    pub async fn remove(&mut self, deadline: Duration, cancel: &CancellationToken) -> Result<()> {
        let Some(handle) = self.handle.as_ref() else { return Ok(()) };
        if handle.state == ContainerState::Removed {
            return Ok(());
        }
        let id = handle.id.clone();
        debug!(container_id = %id, "removing container");
        if let Err(err) = self.runner.run(&["rm", "-f", &id], deadline, cancel).await {
            warn!(container_id = %id, %err, "remove failed (treated as best-effort)");
        }
        if let Some(handle) = self.handle.as_mut() {
            handle.state = ContainerState::Removed;
        }
        Ok(())
    }

    /// Pure substring check: does `output` contain `nonce` verbatim.
    pub fn verify_nonce(output: &str, nonce: &str) -> bool {
        output.contains(nonce)
    }

    /// Confirms the policy is configured, then polls the container's
    /// runtime state with a fast pre-check followed by an exponential
    /// backoff phase, per `spec.md` §4.4.
    pub async fn verify_security(
        &mut self,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> SecurityVerification {
        if !self.policy_path.exists() {
            return SecurityVerification {
                ok: false,
                message: format!("seccomp policy missing at {}", self.policy_path.display()),
                timed_out: false,
            };
        }
        let Some(id) = self.handle.as_ref().map(|h| h.id.clone()) else {
            return SecurityVerification {
                ok: false,
                message: "no container to verify".to_string(),
                timed_out: false,
            };
        };

        let deadline_at = tokio::time::Instant::now() + deadline;
        let short_probe = Duration::from_millis(500);

        // Phase 1: up to ten fast 100-500ms-spaced checks.
        for attempt in 0..10u32 {
            if tokio::time::Instant::now() >= deadline_at {
                return self.verification_deadline_outcome(&id, cancel).await;
            }
            match self.inspect_running(&id, short_probe, cancel).await {
                Ok(true) => {
                    return SecurityVerification {
                        ok: true,
                        message: "container verified running".to_string(),
                        timed_out: false,
                    };
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(container_id = %id, %err, "inspect failed during fast pre-check");
                }
            }
            let sleep_ms = 100 + attempt * 44; // ramps 100ms..~500ms across 10 attempts
            tokio::time::sleep(Duration::from_millis(sleep_ms as u64)).await;
        }

        // Phase 2: up to fifteen attempts, exponential backoff 2s..15s.
        let mut backoff = Duration::from_secs(2);
        for _ in 0..15u32 {
            if tokio::time::Instant::now() >= deadline_at {
                return self.verification_deadline_outcome(&id, cancel).await;
            }
            match self.inspect_status(&id, short_probe, cancel).await {
                Ok(status) if status == "running" => {
                    return SecurityVerification {
                        ok: true,
                        message: "container verified running".to_string(),
                        timed_out: false,
                    };
                }
                Ok(status) if status == "created" => {
                    debug!(container_id = %id, "container stuck in created, nudging with start");
                    let _ = self.runner.run(&["start", &id], short_probe, cancel).await;
                }
                Ok(other) => {
                    debug!(container_id = %id, status = %other, "container not yet running");
                }
                Err(err) => {
                    warn!(container_id = %id, %err, "inspect failed during backoff phase");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(15));
        }

        SecurityVerification {
            ok: false,
            message: "container never reached running state".to_string(),
            timed_out: false,
        }
    }

    /// Called when the verification budget itself elapses mid-poll: if the
    /// container is already running, verification is treated as passed by
    /// default; otherwise it is a timeout-caused failure the executor
    /// demotes to a warning.
    async fn verification_deadline_outcome(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> SecurityVerification {
        match self.inspect_running(id, Duration::from_millis(500), cancel).await {
            Ok(true) => SecurityVerification {
                ok: true,
                message: "verification budget exhausted while container already running".to_string(),
                timed_out: true,
            },
            _ => SecurityVerification {
                ok: false,
                message: "security verification timed out before container reached running state".to_string(),
                timed_out: true,
            },
        }
    }

    async fn inspect_running(
        &self,
        id: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let output = self
            .runner
            .run_checked(&["inspect", "--format={{.State.Running}}", id], deadline, cancel)
            .await?;
        Ok(output.text.trim() == "true")
    }

    async fn inspect_status(
        &self,
        id: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let output = self
            .runner
            .run_checked(&["inspect", "--format={{.State.Status}}", id], deadline, cancel)
            .await?;
        Ok(output.text.trim().to_string())
    }

    fn require_id(&self) -> Result<&str> {
        self.handle.as_ref().map(|h| h.id.as_str()).ok_or(ContainerError::NoContainer)
    }
}

/// Strip control characters except `\n`/`\t`, trim surrounding whitespace.
fn sanitize_output(text: &str) -> String {
    let filtered: String = text
        .chars()
        .filter(|&c| c == '\n' || c == '\t' || !c.is_control())
        .collect();
    filtered.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_nonce_is_substring_match() {
        assert!(ContainerSupervisor::verify_nonce("NONCE: abc\nabc", "abc"));
        assert!(!ContainerSupervisor::verify_nonce("NONCE: abc\nnothing", "feedface"));
    }

    #[test]
    fn sanitize_strips_control_chars_but_keeps_newlines_and_tabs() {
        let raw = "line1\n\x07line2\tok\x00";
        assert_eq!(sanitize_output(raw), "line1\nline2\took");
    }

    #[test]
    fn sanitize_trims_surrounding_whitespace() {
        assert_eq!(sanitize_output("  \n hello \n  "), "hello");
    }

    #[tokio::test]
    async fn remove_with_no_container_is_a_noop() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut supervisor =
            ContainerSupervisor::new(CommandRunner::new("docker"), tmp.path().to_path_buf());
        assert!(supervisor.remove(Duration::from_secs(5), &CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn create_fails_fast_when_policy_missing() {
        let missing = std::env::temp_dir().join("definitely-missing-policy.json");
        let mut supervisor = ContainerSupervisor::new(CommandRunner::new("docker"), missing);
        let err = supervisor
            .create(
                "alpine:latest",
                &[],
                "/",
                &[],
                "256m",
                1.0,
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ContainerError::PolicyMissing(_)));
    }
}
