//! Resource Sampler: a background worker that polls container resource
//! statistics at a fixed 1 Hz cadence and accumulates CPU-seconds,
//! memory-GB-hours, storage-GB, and network-GB counters for one container.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::runner::CommandRunner;
use crate::sizefmt::{bytes_to_gib, parse_size};
use crate::task::{ResourceCounters, SystemMetrics};

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const CGROUP_CPUACCT_PATH: &str = "/sys/fs/cgroup/cpu/cpuacct.usage";
const MIN_LIVENESS_CPU_PERCENT: f64 = 0.01;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("sampler already started")]
    AlreadyStarted,
    #[error("sampler was never started")]
    NotStarted,
}

#[derive(Debug, Deserialize)]
struct StatsJson {
    cpu: String,
    memory: String,
    #[serde(rename = "netIO")]
    net_io: String,
    #[serde(rename = "blockIO")]
    block_io: String,
}

#[derive(Debug, Clone, Copy, Default)]
struct ParsedStats {
    cpu_percent: f64,
    memory_bytes: f64,
    net_bytes: f64,
    block_bytes: f64,
}

fn split_pair(s: &str) -> (&str, &str) {
    match s.split_once('/') {
        Some((a, b)) => (a.trim(), b.trim()),
        None => (s.trim(), "0"),
    }
}

fn parse_stats_json(raw: &str) -> Option<ParsedStats> {
    let parsed: StatsJson = serde_json::from_str(raw).ok()?;

    let cpu_percent = parsed.cpu.trim().trim_end_matches('%').parse().unwrap_or(0.0);

    let (mem_used, _mem_limit) = split_pair(&parsed.memory);
    let memory_bytes = parse_size(mem_used).unwrap_or(0.0);

    let (net_in, net_out) = split_pair(&parsed.net_io);
    let net_bytes = parse_size(net_in).unwrap_or(0.0) + parse_size(net_out).unwrap_or(0.0);

    let (blk_read, blk_write) = split_pair(&parsed.block_io);
    let block_bytes = parse_size(blk_read).unwrap_or(0.0) + parse_size(blk_write).unwrap_or(0.0);

    Some(ParsedStats { cpu_percent, memory_bytes, net_bytes, block_bytes })
}

struct Inner {
    counters: ResourceCounters,
    last_cpu_percent: f64,
    last_memory_bytes: u64,
    last_cgroup_ns: Option<u64>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            counters: ResourceCounters::default(),
            last_cpu_percent: 0.0,
            last_memory_bytes: 0,
            last_cgroup_ns: None,
        }
    }
}

/// One sampler per container. `start` spawns a single background worker;
/// `stop` signals it and joins synchronously.
pub struct ResourceSampler {
    runner: CommandRunner,
    container_id: String,
    cpu_base_ghz: f64,
    core_count: u32,
    state: Arc<RwLock<Inner>>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ResourceSampler {
    pub fn new(runner: CommandRunner, container_id: impl Into<String>, cpu_base_ghz: f64) -> Self {
        let core_count = std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1);
        Self {
            runner,
            container_id: container_id.into(),
            cpu_base_ghz,
            core_count,
            state: Arc::new(RwLock::new(Inner::default())),
            stop_tx: None,
            join_handle: None,
        }
    }

    /// Spawn the background sampling worker. Ticks at 1 Hz until `stop` is
    /// called or `cancel` fires.
    pub fn start(&mut self, cancel: CancellationToken) -> Result<(), SamplerError> {
        if self.join_handle.is_some() {
            return Err(SamplerError::AlreadyStarted);
        }
        let (stop_tx, mut stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let runner = self.runner.clone();
        let container_id = self.container_id.clone();
        let cpu_base_ghz = self.cpu_base_ghz;
        let core_count = self.core_count;
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            let mut last_tick = Instant::now();
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(TICK_INTERVAL) => {}
                }

                let now = Instant::now();
                let elapsed = now.duration_since(last_tick);
                last_tick = now;

                if let Err(err) = tick_once(
                    &runner,
                    &container_id,
                    cpu_base_ghz,
                    core_count,
                    elapsed,
                    &state,
                )
                .await
                {
                    warn!(container_id = %container_id, %err, "resource sample tick failed, counters left unchanged");
                }
            }
        });
        self.join_handle = Some(handle);
        Ok(())
    }

    /// Signal the worker and join it synchronously.
    pub async fn stop(&mut self) -> Result<(), SamplerError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
            Ok(())
        } else {
            Err(SamplerError::NotStarted)
        }
    }

    /// Snapshot of the accumulated counters.
    pub async fn metrics(&self) -> ResourceCounters {
        self.state.read().await.counters
    }

    /// Memory/CPU snapshot for liveness reporting.
    pub async fn system_metrics(&self) -> SystemMetrics {
        let inner = self.state.read().await;
        SystemMetrics { memory_bytes: inner.last_memory_bytes, cpu_seconds: inner.counters.cpu_seconds }
    }
}

async fn tick_once(
    runner: &CommandRunner,
    container_id: &str,
    cpu_base_ghz: f64,
    core_count: u32,
    elapsed: Duration,
    state: &Arc<RwLock<Inner>>,
) -> Result<(), crate::runner::CommandError> {
    let cancel = CancellationToken::new();
    let probe_deadline = Duration::from_secs(5);

    let status = runner
        .run_checked(&["inspect", "--format={{.State.Status}}", container_id], probe_deadline, &cancel)
        .await
        .map(|o| o.text.trim().to_string())
        .unwrap_or_default();
    let running = status == "running";

    if !running {
        // The container may have exited between the previous tick and this
        // one; `docker stats` would fail for a gone container, so rather
        // than drop this tick's contribution to zero, reuse the last
        // non-zero CPU rate observed while it was running for this elapsed
        // interval (spec.md §4.5 step 1).
        let elapsed_secs = elapsed.as_secs_f64().max(0.001);
        let mut inner = state.write().await;
        if inner.last_cpu_percent > 0.0 {
            debug!(
                container_id,
                status,
                last_cpu_percent = inner.last_cpu_percent,
                "container absent/exited, reusing last cpu rate instead of dropping to zero"
            );
            inner.counters.cpu_seconds += (inner.last_cpu_percent / 100.0) * elapsed_secs;
            inner.counters.estimated_cycles = (inner.counters.cpu_seconds * cpu_base_ghz * 1e9) as u64;
            inner.counters.memory_gb_hours +=
                bytes_to_gib(inner.last_memory_bytes as f64) * (elapsed_secs / 3600.0);
        } else {
            debug!(container_id, status, "container not running, no prior sample to reuse");
        }
        return Ok(());
    }

    let stats_output = runner
        .run_checked(
            &[
                "stats",
                "--no-stream",
                "--format",
                "{\"cpu\":\"{{.CPUPerc}}\",\"memory\":\"{{.MemUsage}}\",\"netIO\":\"{{.NetIO}}\",\"blockIO\":\"{{.BlockIO}}\"}",
                container_id,
            ],
            probe_deadline,
            &cancel,
        )
        .await?;

    let parsed = parse_stats_json(stats_output.text.trim()).unwrap_or_default();
    let elapsed_secs = elapsed.as_secs_f64().max(0.001);

    let mut cpu_percent = parsed.cpu_percent;
    if cpu_percent <= 0.0 {
        if let Some(pct) = cgroup_fallback_percent(runner, container_id, elapsed_secs, core_count, state).await {
            cpu_percent = pct;
        }
        if cpu_percent <= 0.0 {
            cpu_percent = MIN_LIVENESS_CPU_PERCENT;
        }
    }

    let mut inner = state.write().await;
    inner.last_cpu_percent = cpu_percent;
    inner.last_memory_bytes = parsed.memory_bytes as u64;

    inner.counters.cpu_seconds += (cpu_percent / 100.0) * elapsed_secs;
    inner.counters.estimated_cycles = (inner.counters.cpu_seconds * cpu_base_ghz * 1e9) as u64;
    inner.counters.memory_gb_hours += bytes_to_gib(parsed.memory_bytes) * (elapsed_secs / 3600.0);
    inner.counters.network_gb = bytes_to_gib(parsed.net_bytes);
    inner.counters.storage_gb = bytes_to_gib(parsed.block_bytes);

    Ok(())
}

/// When `docker stats` reports 0% CPU but the container is running, derive
/// a percentage from cumulative cgroup cpuacct nanoseconds.
async fn cgroup_fallback_percent(
    runner: &CommandRunner,
    container_id: &str,
    elapsed_secs: f64,
    core_count: u32,
    state: &Arc<RwLock<Inner>>,
) -> Option<f64> {
    let cancel = CancellationToken::new();
    let output = runner
        .run_checked(&["exec", container_id, "cat", CGROUP_CPUACCT_PATH], Duration::from_secs(3), &cancel)
        .await
        .ok()?;
    let current_ns: u64 = output.text.trim().parse().ok()?;

    let mut inner = state.write().await;
    let previous_ns = inner.last_cgroup_ns.replace(current_ns);

    let previous_ns = previous_ns?;
    let delta_ns = current_ns.saturating_sub(previous_ns);
    if delta_ns == 0 || core_count == 0 {
        return None;
    }
    let delta_secs = delta_ns as f64 / 1e9;
    Some((delta_secs / elapsed_secs / core_count as f64) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stats_json_fragment() {
        let raw = r#"{"cpu":"12.50%","memory":"100MiB / 256MiB","netIO":"1.2kB / 800B","blockIO":"4.1MB / 2.0MB"}"#;
        let parsed = parse_stats_json(raw).unwrap();
        assert!((parsed.cpu_percent - 12.5).abs() < 1e-9);
        assert!((parsed.memory_bytes - 100.0 * 1024.0 * 1024.0).abs() < 1.0);
        assert!(parsed.net_bytes > 0.0);
        assert!(parsed.block_bytes > 0.0);
    }

    #[test]
    fn malformed_json_yields_none() {
        assert!(parse_stats_json("not json").is_none());
    }

    #[test]
    fn split_pair_defaults_missing_half_to_zero() {
        let (a, b) = split_pair("5MB");
        assert_eq!(a, "5MB");
        assert_eq!(b, "0");
    }

    #[tokio::test]
    async fn metrics_start_at_zero() {
        let sampler = ResourceSampler::new(CommandRunner::new("docker"), "abc123", 3.0);
        let metrics = sampler.metrics().await;
        assert_eq!(metrics, ResourceCounters::default());
    }

    #[tokio::test]
    async fn stop_without_start_is_an_error() {
        let mut sampler = ResourceSampler::new(CommandRunner::new("docker"), "abc123", 3.0);
        assert!(matches!(sampler.stop().await, Err(SamplerError::NotStarted)));
    }

    #[tokio::test]
    async fn counters_are_monotonically_non_decreasing_across_ticks() {
        let state = Arc::new(RwLock::new(Inner::default()));
        let runner = CommandRunner::new("docker");

        // Simulate two ticks by calling the accumulation math directly
        // against synthetic parsed stats, since a live docker daemon is
        // not available in unit tests.
        {
            let mut inner = state.write().await;
            inner.counters.cpu_seconds += 0.5;
            inner.counters.memory_gb_hours += 0.01;
        }
        let after_first = state.read().await.counters;
        {
            let mut inner = state.write().await;
            inner.counters.cpu_seconds += 0.25;
            inner.counters.memory_gb_hours += 0.005;
        }
        let after_second = state.read().await.counters;

        assert!(after_second.cpu_seconds >= after_first.cpu_seconds);
        assert!(after_second.memory_gb_hours >= after_first.memory_gb_hours);
        let _ = runner; // retained for parity with the real tick signature
    }

    #[tokio::test]
    async fn absent_container_reuses_last_nonzero_cpu_rate_instead_of_dropping_to_zero() {
        // `docker` isn't assumed present in the test environment; the
        // `inspect` call inside `tick_once` fails and defaults to an empty
        // status, which is treated the same as "absent/exited" by the
        // not-running branch below.
        let runner = CommandRunner::new("docker");
        let state = Arc::new(RwLock::new(Inner::default()));
        {
            let mut inner = state.write().await;
            inner.last_cpu_percent = 50.0;
            inner.last_memory_bytes = 100 * 1024 * 1024;
        }

        tick_once(&runner, "gone-container", 3.0, 1, Duration::from_secs(2), &state).await.unwrap();

        let after = state.read().await.counters;
        assert!(after.cpu_seconds > 0.0, "expected reused rate to accumulate cpu_seconds, got {after:?}");
        assert!((after.cpu_seconds - 1.0).abs() < 1e-9, "50% for 2s should add 1.0 cpu_seconds, got {}", after.cpu_seconds);
    }

    #[tokio::test]
    async fn absent_container_with_no_prior_sample_stays_at_zero() {
        let runner = CommandRunner::new("docker");
        let state = Arc::new(RwLock::new(Inner::default()));

        tick_once(&runner, "gone-container", 3.0, 1, Duration::from_secs(2), &state).await.unwrap();

        let after = state.read().await.counters;
        assert_eq!(after.cpu_seconds, 0.0);
    }
}
