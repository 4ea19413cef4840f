//! Task and result data model.
//!
//! Mirrors the entities an embedding HTTP control plane decodes a task from
//! and the result record it serializes back: [`Task`] in, [`TaskResult`] out.
//! Nothing here talks to a container runtime; it is the pure data the rest of
//! the crate operates on.

use serde::{Deserialize, Serialize};

/// A single compute job submitted for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Caller-assigned task identifier.
    pub id: uuid::Uuid,
    /// Liveness nonce the container must echo back in its output.
    pub nonce: String,
    /// Image/command/work-dir configuration.
    pub config: TaskConfig,
    /// Environment overrides for the run.
    #[serde(default)]
    pub environment: TaskEnvironment,
}

impl Task {
    /// Resolve the effective working directory: the environment's override
    /// wins over the config's, and `/` is the default when neither is set.
    ///
    /// Both [`TaskConfig`] and [`TaskEnvironment`] can carry a `work_dir`;
    /// the environment descriptor is the more specific, per-invocation
    /// override, so it takes precedence (see DESIGN.md).
    pub fn resolve_work_dir(&self) -> &str {
        self.environment
            .work_dir
            .as_deref()
            .or(self.config.work_dir.as_deref())
            .unwrap_or("/")
    }

    /// Build the full `-e KEY=VALUE` environment list for the container,
    /// always injecting `TASK_NONCE`.
    pub fn env_list(&self) -> Vec<String> {
        let mut env = self.environment.env.clone();
        env.push(format!("TASK_NONCE={}", self.nonce));
        env
    }
}

/// Image and command configuration embedded in a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Image reference to run, e.g. `alpine:latest`.
    pub image_name: String,
    /// Optional content-addressed or HTTP archive URL to load instead of
    /// pulling `image_name` from a registry.
    #[serde(default)]
    pub image_archive_url: Option<String>,
    /// Argv tail to run inside the container. Empty uses the image's
    /// default entrypoint/cmd.
    #[serde(default)]
    pub command: Vec<String>,
    /// Working directory inside the container.
    #[serde(default)]
    pub work_dir: Option<String>,
}

/// Per-invocation environment overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskEnvironment {
    /// Overrides [`TaskConfig::work_dir`] when present.
    #[serde(default)]
    pub work_dir: Option<String>,
    /// Additional `KEY=VALUE` environment entries.
    #[serde(default)]
    pub env: Vec<String>,
}

/// Resource counters accumulated by the [`crate::sampler::ResourceSampler`]
/// over the lifetime of one container.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceCounters {
    /// Cumulative CPU-seconds consumed.
    pub cpu_seconds: f64,
    /// Estimated CPU cycles, derived from `cpu_seconds` and the detected
    /// base clock speed.
    pub estimated_cycles: u64,
    /// Cumulative memory-GB-hours.
    pub memory_gb_hours: f64,
    /// Current cumulative storage I/O in GB (not a rate).
    pub storage_gb: f64,
    /// Current cumulative network I/O in GB (not a rate).
    pub network_gb: f64,
}

/// Lightweight snapshot used for liveness reporting
/// (`Sampler::system_metrics`, the spec's `GetSystemMetrics`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    /// Current memory usage in bytes (last sampled value, not accumulated).
    pub memory_bytes: u64,
    /// Cumulative CPU-seconds consumed so far.
    pub cpu_seconds: f64,
}

/// Outcome of a single task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Identifier of the task this result belongs to.
    pub task_id: uuid::Uuid,
    /// Container exit code, or `-1` on internal failure/timeout.
    pub exit_code: i32,
    /// Captured output, prefixed with `"NONCE: <nonce>\n"` on success.
    pub output: String,
    /// Human-readable error, if any. Populated even alongside a partial
    /// result on graceful timeout.
    pub error: Option<String>,
    /// Set when the execution deadline fired and the container was stopped
    /// gracefully rather than failing outright.
    #[serde(default)]
    pub graceful_timeout: bool,
    /// Non-fatal security-verification issue, if the probe itself timed out
    /// or was otherwise demoted rather than treated as a hard failure.
    #[serde(default)]
    pub security_warning: Option<String>,
    /// Resource counters accumulated during the run.
    pub resources: ResourceCounters,
}

impl TaskResult {
    /// Convenience constructor for an internal failure with no resource
    /// data collected (provisioning/security failures abort before the
    /// sampler ever starts).
    pub fn failed(task_id: uuid::Uuid, error: impl Into<String>) -> Self {
        Self {
            task_id,
            exit_code: -1,
            output: String::new(),
            error: Some(error.into()),
            graceful_timeout: false,
            security_warning: None,
            resources: ResourceCounters::default(),
        }
    }
}
