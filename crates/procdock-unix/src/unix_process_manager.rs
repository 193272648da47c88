use anyhow::Result;
use async_trait::async_trait;
use procdock_core::{
    AppStdErr, AppStdOut, ProcessHandle, ProcessId, ProcessInfo, ProcessLifecycle, ProcessManager,
    ProcessStatus, ProcessTermination, TerminationResult,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use procdock_core::forward_output;
    use std::process::Stdio;
    use sysinfo::System;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        program: String,
        args: Vec<String>,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, program: String, args: Vec<String>) -> Self {
            Self {
                child,
                program,
                args,
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn pid(&self) -> Option<ProcessId> {
            self.child.id().map(ProcessId::from)
        }

        fn program(&self) -> &str {
            &self.program
        }

        fn args(&self) -> &[String] {
            &self.args
        }

        async fn is_running(&self) -> bool {
            if let Some(pid) = self.pid() {
                let nix_pid = NixPid::from_raw(pid.0 as i32);
                // Signal 0 checks existence without delivering anything
                let alive = signal::kill(nix_pid, None).is_ok();
                debug!(pid = %pid, alive, "checked unix process liveness");
                alive
            } else {
                debug!("process handle has no PID, process has exited");
                false
            }
        }

        async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
            match self.child.try_wait()? {
                Some(status) => Ok(Some(ProcessStatus::Exited(status))),
                None => Ok(None),
            }
        }

        async fn wait(&mut self) -> Result<ProcessStatus> {
            let status = self.child.wait().await?;
            Ok(ProcessStatus::Exited(status))
        }

        async fn kill(&mut self) -> Result<()> {
            self.child
                .kill()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
        }
    }

    /// Unix-specific process manager with process tree management
    pub struct UnixProcessManager {
        system: std::sync::Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        async fn spawn_process(
            &self,
            label: &str,
            program: &str,
            args: &[String],
            working_dir: Option<&Path>,
            env: &HashMap<String, String>,
            out: AppStdOut,
            err: AppStdErr,
        ) -> Result<Box<dyn ProcessHandle>> {
            let mut cmd = Command::new(program);
            cmd.args(args);

            if let Some(dir) = working_dir {
                cmd.current_dir(dir);
            }

            // Overlay onto the inherited environment, descriptor values win
            for (key, value) in env {
                cmd.env(key, value);
            }

            // New process group so the whole tree can be signalled at once
            cmd.process_group(0);

            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());

            let mut child = cmd.spawn()?;

            if let Some(stdout) = child.stdout.take() {
                let label = label.to_string();
                let out = out.clone();
                tokio::spawn(async move {
                    let _ = forward_output(&label, stdout, out).await;
                });
            }
            if let Some(stderr) = child.stderr.take() {
                let label = label.to_string();
                let err = err.clone();
                tokio::spawn(async move {
                    let _ = forward_output(&label, stderr, err).await;
                });
            }

            if let Some(pid) = child.id() {
                info!(app = %label, pid = %pid, program = %program, args = ?args, "spawned unix process");
            }

            Ok(Box::new(UnixProcessHandle::new(
                child,
                program.to_string(),
                args.to_vec(),
            )))
        }

        async fn is_process_healthy(&self, handle: &dyn ProcessHandle) -> bool {
            handle.is_running().await
        }

        async fn process_info(&self, handle: &dyn ProcessHandle) -> Result<ProcessInfo> {
            let pid = handle
                .pid()
                .ok_or_else(|| anyhow::anyhow!("Process has no PID"))?;

            let status = if handle.is_running().await {
                ProcessStatus::Running
            } else {
                ProcessStatus::Terminated
            };

            Ok(ProcessInfo {
                pid,
                status,
                program: handle.program().to_string(),
                args: handle.args().to_vec(),
            })
        }

        async fn wait_for_exit(
            &self,
            handle: &mut dyn ProcessHandle,
            timeout: Option<Duration>,
        ) -> Result<ProcessStatus> {
            match timeout {
                Some(duration) => tokio::time::timeout(duration, handle.wait())
                    .await
                    .map_err(|_| anyhow::anyhow!("Timeout waiting for process exit"))?,
                None => handle.wait().await,
            }
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            if let Some(pid) = handle.pid() {
                let nix_pid = NixPid::from_raw(pid.0 as i32);

                match signal::kill(nix_pid, Signal::SIGTERM) {
                    Ok(()) => {
                        info!(pid = %pid, "sent SIGTERM to process");
                        TerminationResult::Success
                    }
                    Err(nix::errno::Errno::ESRCH) => {
                        info!(pid = %pid, "process not found (already terminated)");
                        TerminationResult::ProcessNotFound
                    }
                    Err(nix::errno::Errno::EPERM) => {
                        warn!(pid = %pid, "permission denied to terminate process");
                        TerminationResult::AccessDenied
                    }
                    Err(e) => {
                        warn!(pid = %pid, error = %e, "failed to send SIGTERM");
                        TerminationResult::Failed(format!("SIGTERM failed: {e}"))
                    }
                }
            } else {
                TerminationResult::ProcessNotFound
            }
        }

        async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            if let Some(pid) = handle.pid() {
                let nix_pid = NixPid::from_raw(pid.0 as i32);

                match signal::kill(nix_pid, Signal::SIGKILL) {
                    Ok(()) => {
                        info!(pid = %pid, "sent SIGKILL to process");
                        // Also reap through the handle
                        if let Err(e) = handle.kill().await {
                            warn!(error = %e, "handle kill cleanup failed");
                        }
                        TerminationResult::Success
                    }
                    Err(nix::errno::Errno::ESRCH) => {
                        info!(pid = %pid, "process not found (already terminated)");
                        TerminationResult::ProcessNotFound
                    }
                    Err(nix::errno::Errno::EPERM) => {
                        warn!(pid = %pid, "permission denied to kill process");
                        TerminationResult::AccessDenied
                    }
                    Err(e) => {
                        warn!(pid = %pid, error = %e, "failed to send SIGKILL");
                        TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                    }
                }
            } else {
                TerminationResult::ProcessNotFound
            }
        }

        async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
            let mut system = self.system.lock().unwrap();
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent_pid.0, &mut children);

            Ok(children.into_iter().map(ProcessId::from).collect())
        }

        async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
            info!(root_pid = %root_pid, "terminating process tree");

            let children = match self.find_child_processes(root_pid).await {
                Ok(children) => children,
                Err(e) => {
                    warn!(root_pid = %root_pid, error = %e, "failed to find child processes");
                    return TerminationResult::Failed(format!("Failed to enumerate children: {e}"));
                }
            };

            if children.is_empty() {
                debug!(root_pid = %root_pid, "no child processes found");
            } else {
                info!(count = children.len(), "terminating child processes");

                // Children first, bottom-up
                for child_pid in children.iter().rev() {
                    match self.terminate_single_process(*child_pid).await {
                        TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                        result => {
                            warn!(pid = %child_pid, result = ?result, "failed to terminate child process");
                        }
                    }
                }
            }

            self.terminate_single_process(root_pid).await
        }

        async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult {
            let pgid = NixPid::from_raw(pid.0 as i32);

            // SIGTERM first for graceful shutdown
            match signal::killpg(pgid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(pgid = %pid, "sent SIGTERM to process group");

                    tokio::time::sleep(Duration::from_millis(2000)).await;

                    // Escalate to SIGKILL for whatever is left
                    match signal::killpg(pgid, Signal::SIGKILL) {
                        Ok(()) => {
                            info!(pgid = %pid, "sent SIGKILL to process group");
                            TerminationResult::Success
                        }
                        Err(nix::errno::Errno::ESRCH) => {
                            info!(pgid = %pid, "process group already terminated");
                            TerminationResult::Success
                        }
                        Err(e) => {
                            warn!(pgid = %pid, error = %e, "failed to SIGKILL process group");
                            TerminationResult::Failed(format!(
                                "SIGKILL to process group failed: {e}"
                            ))
                        }
                    }
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!(pgid = %pid, "process group not found (already terminated)");
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!(pgid = %pid, "permission denied to terminate process group");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(pgid = %pid, error = %e, "failed to SIGTERM process group");
                    TerminationResult::Failed(format!("SIGTERM to process group failed: {e}"))
                }
            }
        }
    }

    impl UnixProcessManager {
        /// Terminate a single process by PID with SIGTERM -> SIGKILL escalation
        async fn terminate_single_process(&self, pid: ProcessId) -> TerminationResult {
            let nix_pid = NixPid::from_raw(pid.0 as i32);

            match signal::kill(nix_pid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(pid = %pid, "sent SIGTERM to process");

                    tokio::time::sleep(Duration::from_millis(500)).await;

                    match signal::kill(nix_pid, Signal::SIGKILL) {
                        Ok(()) => {
                            info!(pid = %pid, "sent SIGKILL to process");
                            TerminationResult::Success
                        }
                        Err(nix::errno::Errno::ESRCH) => {
                            info!(pid = %pid, "process already terminated");
                            TerminationResult::Success
                        }
                        Err(e) => {
                            warn!(pid = %pid, error = %e, "failed to kill process");
                            TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                        }
                    }
                }
                Err(nix::errno::Errno::ESRCH) => {
                    info!(pid = %pid, "process not found (already terminated)");
                    TerminationResult::Success
                }
                Err(nix::errno::Errno::EPERM) => {
                    warn!(pid = %pid, "permission denied to terminate process");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(pid = %pid, error = %e, "failed to send SIGTERM");
                    TerminationResult::Failed(format!("SIGTERM failed: {e}"))
                }
            }
        }

        /// Recursively find all child processes, deepest first
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                #[allow(clippy::collapsible_if)]
                if let Some(ppid) = process.parent() {
                    if ppid.as_u32() == parent_pid {
                        let child_pid = pid.as_u32();
                        Self::find_children_recursive(system, child_pid, result);
                        result.push(child_pid);
                    }
                }
            }
        }
    }

    #[async_trait]
    impl ProcessManager for UnixProcessManager {
        fn new() -> Self {
            debug!("initializing unix process manager");
            Self {
                system: std::sync::Mutex::new(System::new_all()),
            }
        }

        async fn cleanup(&self) -> Result<()> {
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn sinks() -> (AppStdOut, AppStdErr) {
            let (out_end, _keep_out) = tokio::io::duplex(4096);
            let (err_end, _keep_err) = tokio::io::duplex(4096);
            // The read halves are dropped; forwarding errors are ignored
            (
                AppStdOut::new(Box::new(out_end)),
                AppStdErr::new(Box::new(err_end)),
            )
        }

        #[tokio::test]
        async fn test_spawn_and_wait() {
            let manager = UnixProcessManager::new();
            let (out, err) = sinks();

            let mut handle = manager
                .spawn_process(
                    "echo-test",
                    "echo",
                    &["hello".to_string()],
                    None,
                    &HashMap::new(),
                    out,
                    err,
                )
                .await
                .unwrap();

            let status = handle.wait().await.unwrap();
            assert!(status.success());
        }

        #[tokio::test]
        async fn test_spawn_missing_binary_fails() {
            let manager = UnixProcessManager::new();
            let (out, err) = sinks();

            let result = manager
                .spawn_process(
                    "missing",
                    "definitely-not-a-real-binary-procdock",
                    &[],
                    None,
                    &HashMap::new(),
                    out,
                    err,
                )
                .await;

            assert!(result.is_err());
        }

        #[tokio::test]
        async fn test_liveness_and_termination() {
            let manager = UnixProcessManager::new();
            let (out, err) = sinks();

            let mut handle = manager
                .spawn_process(
                    "sleeper",
                    "sleep",
                    &["30".to_string()],
                    None,
                    &HashMap::new(),
                    out,
                    err,
                )
                .await
                .unwrap();

            assert!(handle.is_running().await);

            let result = manager.terminate_gracefully(&mut handle).await;
            assert_eq!(result, TerminationResult::Success);

            let status = handle.wait().await.unwrap();
            assert!(!status.success());
            assert!(!handle.is_running().await);
        }

        #[tokio::test]
        async fn test_env_overlay_reaches_child() {
            let manager = UnixProcessManager::new();
            let (out, err) = sinks();

            let mut env = HashMap::new();
            env.insert("PROCDOCK_TEST_FLAG".to_string(), "1".to_string());

            // sh -c 'test "$PROCDOCK_TEST_FLAG" = 1' exits 0 only when the
            // overlay reached the child
            let mut handle = manager
                .spawn_process(
                    "env-check",
                    "sh",
                    &[
                        "-c".to_string(),
                        "test \"$PROCDOCK_TEST_FLAG\" = 1".to_string(),
                    ],
                    None,
                    &env,
                    out,
                    err,
                )
                .await
                .unwrap();

            let status = handle.wait().await.unwrap();
            assert!(status.success());
        }

        #[tokio::test]
        async fn test_child_inherits_parent_environment() {
            let manager = UnixProcessManager::new();
            let (out, err) = sinks();

            // PATH is not part of the overlay; the overlay only carries
            // the value the child should compare against. The check can
            // only pass if the child inherited PATH from this process.
            let mut env = HashMap::new();
            env.insert(
                "PROCDOCK_EXPECTED_PATH".to_string(),
                std::env::var("PATH").unwrap(),
            );

            let mut handle = manager
                .spawn_process(
                    "inherit-check",
                    "sh",
                    &[
                        "-c".to_string(),
                        "test \"$PATH\" = \"$PROCDOCK_EXPECTED_PATH\"".to_string(),
                    ],
                    None,
                    &env,
                    out,
                    err,
                )
                .await
                .unwrap();

            let status = handle.wait().await.unwrap();
            assert!(status.success());
        }
    }
}

// Re-export the Unix implementation when on Unix systems
#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

// Provide stub implementations for non-Unix systems
#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessManager;

#[cfg(not(unix))]
impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for UnixProcessManager {
    fn default() -> Self {
        Self::new()
    }
}
