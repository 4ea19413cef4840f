//! Executor configuration.
//!
//! Deliberately not `Deserialize`: loading this from a file or CLI flags is
//! the outer configuration layer's job (an explicit Non-goal owner), not
//! this crate's. The builder style mirrors the teacher's
//! `ContainerExecutionConfig`.

use std::time::Duration;

/// Process-lifetime executor configuration: resource limits and the two
/// timeout budgets from `spec.md` §3.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Memory limit passed straight through to `--memory`, e.g. `"256m"`.
    pub memory_limit: String,
    /// Fractional CPU quota passed to `--cpus`, e.g. `1.0`.
    pub cpu_quota: f64,
    /// Deadline for every non-execution phase: image prep, create, start,
    /// logs, removal.
    pub setup_timeout: Duration,
    /// Deadline governing only the `created -> running -> exited`
    /// transition.
    pub execution_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            memory_limit: "256m".to_string(),
            cpu_quota: 1.0,
            setup_timeout: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(300),
        }
    }
}

impl ExecutorConfig {
    pub fn new(memory_limit: impl Into<String>, cpu_quota: f64) -> Self {
        Self { memory_limit: memory_limit.into(), cpu_quota, ..Default::default() }
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Byte count the `memory_limit` string represents, for callers that
    /// need a number rather than the raw docker flag value.
    pub fn memory_limit_bytes(&self) -> Result<f64, crate::sizefmt::SizeParseError> {
        crate::sizefmt::parse_size(&self.memory_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ExecutorConfig::default();
        assert_eq!(config.memory_limit, "256m");
        assert_eq!(config.cpu_quota, 1.0);
        assert_eq!(config.setup_timeout, Duration::from_secs(60));
    }

    #[test]
    fn builder_overrides_timeouts() {
        let config = ExecutorConfig::new("512m", 2.0)
            .with_setup_timeout(Duration::from_secs(10))
            .with_execution_timeout(Duration::from_secs(5));
        assert_eq!(config.setup_timeout, Duration::from_secs(10));
        assert_eq!(config.execution_timeout, Duration::from_secs(5));
    }

    #[test]
    fn memory_limit_bytes_parses_human_string() {
        let config = ExecutorConfig::new("256m", 1.0);
        assert_eq!(config.memory_limit_bytes().unwrap(), 256_000_000.0);
    }
}
