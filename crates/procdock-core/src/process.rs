use crate::stdio::{AppStdErr, AppStdOut};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// OS-level process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a managed process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited with the given status
    Exited(std::process::ExitStatus),
    /// Process was terminated by the supervisor
    Terminated,
    /// Process failed to start or encountered an error
    Failed(String),
    /// Process status is unknown
    Unknown,
}

impl ProcessStatus {
    /// Whether this status represents a clean exit
    pub fn success(&self) -> bool {
        matches!(self, ProcessStatus::Exited(status) if status.success())
    }

    /// Exit code, when the process exited and the platform reports one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessStatus::Exited(status) => status.code(),
            _ => None,
        }
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Insufficient privileges to signal the process
    AccessDenied,
    /// Operation timed out
    Timeout,
    /// Operation failed with a specific error message
    Failed(String),
}

/// Information about a running process
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub program: String,
    pub args: Vec<String>,
    pub status: ProcessStatus,
}

/// Error types for low-level process operations
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),
    #[error("process not found: {0}")]
    ProcessNotFound(ProcessId),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("operation timed out")]
    Timeout,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("other error: {0}")]
    Other(String),
}

/// Core trait for platform-specific process spawning and monitoring
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// Spawn a new child process.
    ///
    /// `env` is an overlay merged onto the supervisor's inherited
    /// environment, overlay values taking precedence. The child's
    /// stdout/stderr are piped and forwarded line-by-line to `out` and
    /// `err`, prefixed with `label`.
    async fn spawn_process(
        &self,
        label: &str,
        program: &str,
        args: &[String],
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
        out: AppStdOut,
        err: AppStdErr,
    ) -> Result<Box<dyn ProcessHandle>>;

    /// Check if a process is still running and healthy
    async fn is_process_healthy(&self, handle: &dyn ProcessHandle) -> bool;

    /// Get detailed information about a process
    async fn process_info(&self, handle: &dyn ProcessHandle) -> Result<ProcessInfo>;

    /// Wait for a process to exit with optional timeout
    async fn wait_for_exit(
        &self,
        handle: &mut dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus>;
}

/// Trait for comprehensive process termination including process trees
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Terminate a single process gracefully (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Force kill a single process (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Find all child processes of a given process
    async fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;

    /// Terminate an entire process tree (parent and all descendants)
    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult;

    /// Terminate a process group (Unix only, returns ProcessNotFound on Windows)
    async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult;

    /// Complete termination strategy: process group -> process tree -> individual process
    async fn terminate_completely(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        if let Some(pid) = handle.pid() {
            // Process group not found or failed, fall through to the tree
            if self.terminate_process_group(pid).await == TerminationResult::Success {
                return TerminationResult::Success;
            }

            // Tree failed too, fall through to individual termination
            if self.terminate_process_tree(pid).await == TerminationResult::Success {
                return TerminationResult::Success;
            }
        }

        match self.terminate_gracefully(handle).await {
            TerminationResult::Success => {
                // Give the process a moment to exit on its own
                tokio::time::sleep(Duration::from_millis(1000)).await;

                if handle.is_running().await {
                    self.force_kill(handle).await
                } else {
                    TerminationResult::Success
                }
            }
            TerminationResult::ProcessNotFound => TerminationResult::Success,
            _ => self.force_kill(handle).await,
        }
    }
}

/// Handle to one spawned child process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Process ID (None once the process has exited)
    fn pid(&self) -> Option<ProcessId>;

    /// Program that started this process
    fn program(&self) -> &str;

    /// Arguments the process was started with
    fn args(&self) -> &[String];

    /// Check if the process is still running (non-blocking)
    async fn is_running(&self) -> bool;

    /// Try to get the exit status without blocking
    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Kill the process
    async fn kill(&mut self) -> Result<()>;
}

/// Platform process manager combining lifecycle and termination
#[async_trait]
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {
    /// Create a new process manager instance
    fn new() -> Self
    where
        Self: Sized;

    /// Cleanup any resources held by the process manager
    async fn cleanup(&self) -> Result<()>;
}

/// Implementation of ProcessHandle for boxed trait objects so that
/// platform managers can return `Box<dyn ProcessHandle>` everywhere
#[async_trait]
impl ProcessHandle for Box<dyn ProcessHandle> {
    fn pid(&self) -> Option<ProcessId> {
        (**self).pid()
    }

    fn program(&self) -> &str {
        (**self).program()
    }

    fn args(&self) -> &[String] {
        (**self).args()
    }

    async fn is_running(&self) -> bool {
        (**self).is_running().await
    }

    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
        (**self).try_wait().await
    }

    async fn wait(&mut self) -> Result<ProcessStatus> {
        (**self).wait().await
    }

    async fn kill(&mut self) -> Result<()> {
        (**self).kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_id_display() {
        let pid = ProcessId::from(8014);
        assert_eq!(pid.to_string(), "8014");
    }

    #[test]
    fn test_process_status_helpers() {
        assert!(!ProcessStatus::Running.success());
        assert!(!ProcessStatus::Terminated.success());
        assert_eq!(ProcessStatus::Unknown.exit_code(), None);
    }
}
