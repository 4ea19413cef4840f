//! Container Supervisor: creates, starts, waits for, logs, stops, and
//! removes a single container, applying resource limits and the syscall
//! policy. Owns the lifecycle state machine described in `spec.md` §4.4.

mod state;
mod supervisor;

pub use state::ContainerState;
pub use supervisor::{ContainerHandle, ContainerSupervisor, SecurityVerification, WaitOutcome};

use thiserror::Error;

use crate::runner::CommandError;

/// Errors raised by the Container Supervisor.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("seccomp policy file missing at {0}")]
    PolicyMissing(std::path::PathBuf),
    #[error("unexpected inspect output for container {container_id}: {output:?}")]
    InspectParse { container_id: String, output: String },
    #[error("no container has been created yet")]
    NoContainer,
}

pub type Result<T> = std::result::Result<T, ContainerError>;
