//! Syscall Policy Store.
//!
//! Synthesizes a Docker-compatible seccomp profile at first use, persists it
//! to a private temporary file, and hands out its path to the Container
//! Supervisor for every `create`. The file is process-scoped: it is not
//! recreated or deleted between tasks (see DESIGN.md's Open Question
//! resolution), only on an explicit [`PolicyStore::shutdown`].

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// Syscalls that must never be filtered because interpreted runtimes inside
/// the container depend on them.
const NEVER_BLOCK: &[&str] = &["execve"];

/// Syscalls blocked with `SCMP_ACT_ERRNO` by the default policy.
const BLOCKED_SYSCALLS: &[&str] = &[
    "ptrace",
    "process_vm_readv",
    "process_vm_writev",
    "reboot",
    "mount",
    "umount",
    "umount2",
];

const ARCHITECTURES: &[&str] = &["SCMP_ARCH_X86_64", "SCMP_ARCH_X86", "SCMP_ARCH_AARCH64"];

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to serialize seccomp profile: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write seccomp profile to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to set permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Serialize)]
struct SyscallRule {
    name: &'static str,
    action: &'static str,
}

#[derive(Serialize)]
struct SeccompProfile {
    #[serde(rename = "defaultAction")]
    default_action: &'static str,
    architectures: &'static [&'static str],
    syscalls: Vec<SyscallRule>,
}

/// Owns the on-disk seccomp profile used by every container the process
/// supervises.
pub struct PolicyStore {
    path: PathBuf,
}

impl PolicyStore {
    /// Generate a new profile under the OS temp directory and persist it
    /// with mode 0600.
    pub fn new() -> Result<Self, PolicyError> {
        let path = Self::fresh_path();
        Self::write_profile(&path)?;
        info!(path = %path.display(), "seccomp policy written");
        Ok(Self { path })
    }

    fn fresh_path() -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("seccomp-profile-{nanos}.json"))
    }

    fn write_profile(path: &Path) -> Result<(), PolicyError> {
        debug_assert!(
            !BLOCKED_SYSCALLS.iter().any(|s| NEVER_BLOCK.contains(s)),
            "execve must never appear in the blocked list"
        );

        let profile = SeccompProfile {
            default_action: "SCMP_ACT_ALLOW",
            architectures: ARCHITECTURES,
            syscalls: BLOCKED_SYSCALLS
                .iter()
                .map(|&name| SyscallRule { name, action: "SCMP_ACT_ERRNO" })
                .collect(),
        };

        let json = serde_json::to_string_pretty(&profile)?;

        let mut file = std::fs::File::create(path).map_err(|source| PolicyError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        file.write_all(json.as_bytes()).map_err(|source| PolicyError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(
                |source| PolicyError::Permissions { path: path.to_path_buf(), source },
            )?;
        }

        Ok(())
    }

    /// Path of the serialized policy document, valid for the life of the
    /// process (or until [`shutdown`](Self::shutdown) is called).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the policy file. Call exactly once, at process teardown —
    /// never mid-run, since concurrent/sequential tasks may still be
    /// referencing the path (see DESIGN.md).
    pub fn shutdown(&self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), %err, "failed to remove seccomp policy");
            }
        } else {
            debug!(path = %self.path.display(), "seccomp policy removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // Every test here creates, reads, and removes a file under the shared OS
    // temp directory with a nanosecond-resolution name; `#[serial]` keeps
    // them from interleaving their create/shutdown pairs against each other
    // or against anything else in the suite touching that directory.

    #[test]
    #[serial(policy_file)]
    fn profile_blocks_expected_syscalls_but_never_execve() {
        let store = PolicyStore::new().unwrap();
        let contents = std::fs::read_to_string(store.path()).unwrap();
        for syscall in BLOCKED_SYSCALLS {
            assert!(contents.contains(syscall), "missing {syscall} in profile");
        }
        assert!(!contents.contains("\"execve\""));
        store.shutdown();
    }

    #[test]
    #[serial(policy_file)]
    fn file_is_readable_with_restricted_permissions() {
        let store = PolicyStore::new().unwrap();
        let metadata = std::fs::metadata(store.path()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        }
        assert!(metadata.len() > 0);
        store.shutdown();
    }

    #[test]
    #[serial(policy_file)]
    fn shutdown_then_missing_file_does_not_panic() {
        let store = PolicyStore::new().unwrap();
        store.shutdown();
        assert!(!store.path().exists());
    }
}
