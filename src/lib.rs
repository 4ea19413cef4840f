//! # Task Runner Core
//!
//! A worker-node task execution engine that runs untrusted compute jobs
//! inside hardened, seccomp-filtered containers. Every container interaction
//! goes through an external container tool invoked as a subprocess — there is
//! no container-engine API client in this crate.
//!
//! ## Architecture Overview
//!
//! - **[`runner`]**: thin subprocess wrapper every other module funnels
//!   through to invoke the container tool.
//! - **[`image`]**: ensures an image exists locally, by registry pull or by
//!   streaming and loading an HTTP/IPFS archive.
//! - **[`policy`]**: synthesizes and persists the seccomp profile every
//!   container is created with.
//! - **[`container`]**: creates, starts, waits for, logs, stops, and removes
//!   a single container, and verifies it came up under the intended policy.
//! - **[`sampler`]**: a 1 Hz background sampler of a running container's
//!   CPU, memory, network, and disk usage.
//! - **[`task`]**: the data model a task comes in as and a result goes out
//!   as.
//! - **[`executor`]**: composes all of the above into the end-to-end
//!   sequence that runs one task to a result.
//! - **[`sizefmt`]**: shared human-readable byte-size parsing used by both
//!   the executor's memory limits and the sampler's `docker stats` parsing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use task_runner_core::executor::{Executor, ExecutorConfig};
//! use task_runner_core::policy::PolicyStore;
//! use task_runner_core::task::{Task, TaskConfig, TaskEnvironment};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = PolicyStore::new()?;
//!     let executor = Executor::new(ExecutorConfig::default(), policy.path().to_path_buf());
//!
//!     let task = Task {
//!         id: uuid::Uuid::new_v4(),
//!         nonce: "deadbeef".to_string(),
//!         config: TaskConfig {
//!             image_name: "alpine:latest".to_string(),
//!             image_archive_url: None,
//!             command: vec!["sh".to_string(), "-c".to_string(), "echo $TASK_NONCE".to_string()],
//!             work_dir: None,
//!         },
//!         environment: TaskEnvironment::default(),
//!     };
//!
//!     let result = executor.execute_task(&task, &CancellationToken::new()).await;
//!     println!("exit_code={} output={}", result.exit_code, result.output);
//!
//!     policy.shutdown();
//!     Ok(())
//! }
//! ```

/// Command Runner: the subprocess wrapper every other module funnels
/// through to invoke the host container tool.
pub mod runner;

/// Image Provisioner: ensures an image exists locally before a container is
/// created from it.
pub mod image;

/// Syscall Policy Store: generates and persists the seccomp profile.
pub mod policy;

/// Container Supervisor and its lifecycle state machine.
pub mod container;

/// Resource Sampler: 1 Hz background polling of a container's resource
/// usage.
pub mod sampler;

/// Task and result data model.
pub mod task;

/// Shared human-readable byte-size parsing.
pub mod sizefmt;

/// Executor: composes every other module into the end-to-end task-execution
/// sequence.
pub mod executor;

pub use container::{ContainerError, ContainerHandle, ContainerState, ContainerSupervisor, SecurityVerification, WaitOutcome};
pub use executor::{Executor, ExecutorConfig, ExecutorError};
pub use image::{ImageProvisioner, ProvisionError};
pub use policy::{PolicyError, PolicyStore};
pub use runner::{CommandError, CommandOutput, CommandRunner};
pub use sampler::{ResourceSampler, SamplerError};
pub use task::{ResourceCounters, SystemMetrics, Task, TaskConfig, TaskEnvironment, TaskResult};
