//! Command Runner: the thin wrapper every other component funnels through to
//! invoke the host container tool as a child process.
//!
//! Grounded in the host-execution pattern (`tokio::process::Command` plus a
//! timeout race), generalized with a [`CancellationToken`] so a caller-side
//! cancel and a deadline firing share one code path, per the spec's
//! "ambient deadline/token" wording.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Combined stdout+stderr output of a command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Interleaved stdout/stderr text.
    pub text: String,
    /// Process exit code, if the process actually exited.
    pub exit_code: Option<i32>,
    /// Wall-clock time the invocation took.
    pub duration: Duration,
}

/// Error kinds a [`CommandRunner`] invocation can fail with.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{program} not found")]
    NotFound { program: String },
    #[error("failed to spawn {program} {args:?}: {source}")]
    SpawnFailed {
        program: String,
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} {args:?} exited with {exit_code}: {output}")]
    NonzeroExit {
        program: String,
        args: Vec<String>,
        exit_code: i32,
        output: String,
    },
    #[error("{program} {args:?} cancelled")]
    Cancelled { program: String, args: Vec<String> },
    #[error("{program} {args:?} timed out after {timeout:?}")]
    Timeout {
        program: String,
        args: Vec<String>,
        timeout: Duration,
    },
}

impl CommandError {
    /// True for the cancellation/timeout variants, i.e. failures that are
    /// not the invoked program's fault.
    pub fn is_cancelled_or_timeout(&self) -> bool {
        matches!(self, CommandError::Cancelled { .. } | CommandError::Timeout { .. })
    }
}

/// Invokes an external program with an argv vector under a deadline and
/// cancellation token, capturing combined output.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    /// The container tool binary, e.g. `"docker"`.
    program: String,
}

impl CommandRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Run `program args...` until it exits, the deadline elapses, or
    /// `cancel` is triggered — whichever comes first. On cancellation or
    /// timeout the child is killed; on return, no child belonging to this
    /// call remains.
    pub async fn run(
        &self,
        args: &[impl AsRef<str>],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        debug!(program = %self.program, ?args, "running command");

        let mut command = Command::new(&self.program);
        command.args(&args);
        command.stdin(std::process::Stdio::null());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());
        command.kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CommandError::NotFound { program: self.program.clone() }
            } else {
                CommandError::SpawnFailed {
                    program: self.program.clone(),
                    args: args.clone(),
                    source,
                }
            }
        })?;

        let start = Instant::now();
        let wait = async {
            let output = child.wait_with_output().await;
            output
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(program = %self.program, ?args, "command cancelled, killing child");
                Err(CommandError::Cancelled { program: self.program.clone(), args })
            }
            result = tokio::time::timeout(deadline, wait) => {
                match result {
                    Err(_elapsed) => {
                        warn!(program = %self.program, ?args, ?deadline, "command timed out, killing child");
                        Err(CommandError::Timeout { program: self.program.clone(), args, timeout: deadline })
                    }
                    Ok(Err(source)) => Err(CommandError::SpawnFailed { program: self.program.clone(), args, source }),
                    Ok(Ok(output)) => {
                        let duration = start.elapsed();
                        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                        text.push_str(&String::from_utf8_lossy(&output.stderr));
                        let exit_code = output.status.code();
                        Ok(CommandOutput { text, exit_code, duration })
                    }
                }
            }
        }
    }

    /// Like [`run`](Self::run), but additionally treats a non-zero exit as
    /// an error. Most callers want this; a handful (e.g. `wait`, whose
    /// non-zero exit code is meaningful data, not a failure) call
    /// [`run`](Self::run) directly.
    pub async fn run_checked(
        &self,
        args: &[impl AsRef<str>],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let args_owned: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let output = self.run(args, deadline, cancel).await?;
        match output.exit_code {
            Some(0) => Ok(output),
            Some(code) => Err(CommandError::NonzeroExit {
                program: self.program.clone(),
                args: args_owned,
                exit_code: code,
                output: output.text,
            }),
            None => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_command() {
        let runner = CommandRunner::new("echo");
        let output = runner
            .run(&["hello"], Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert!(output.text.contains("hello"));
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let runner = CommandRunner::new("definitely-not-a-real-binary-xyz");
        let err = runner
            .run(&["foo"], Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
    }

    #[tokio::test]
    async fn timeout_kills_child_and_returns_timeout_error() {
        let runner = CommandRunner::new("sleep");
        let err = runner
            .run(&["5"], Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancellation_kills_child_and_returns_cancelled_error() {
        let runner = CommandRunner::new("sleep");
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        let err = runner
            .run(&["5"], Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn run_checked_rejects_nonzero_exit() {
        let runner = CommandRunner::new("sh");
        let err = runner
            .run_checked(&["-c", "exit 3"], Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            CommandError::NonzeroExit { exit_code, .. } => assert_eq!(exit_code, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
