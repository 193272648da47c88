use anyhow::Result;
use async_trait::async_trait;
use procdock_core::{
    AppStdErr, AppStdOut, ProcessHandle, ProcessId, ProcessInfo, ProcessLifecycle, ProcessManager,
    ProcessStatus, ProcessTermination, TerminationResult, forward_output,
};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::System;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    program: String,
    args: Vec<String>,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, program: String, args: Vec<String>) -> Self {
        Self {
            child,
            program,
            args,
        }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
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
            let mut system = System::new();
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );
            system.processes().keys().any(|p| p.as_u32() == pid.0)
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

/// Windows-specific process manager with taskkill-based tree termination
pub struct WindowsProcessManager {
    system: std::sync::Mutex<System>,
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
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

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // Background processes get no console window
        #[cfg(windows)]
        {
            // CREATE_NO_WINDOW (0x08000000)
            cmd.creation_flags(0x08000000);
        }

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
            info!(app = %label, pid = %pid, program = %program, args = ?args, "spawned windows process");
        }

        Ok(Box::new(WindowsProcessHandle::new(
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
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        if let Some(pid) = handle.pid() {
            match self.taskkill(pid.0, false).await {
                Ok(true) => {
                    info!(pid = %pid, "sent graceful termination to process");
                    TerminationResult::Success
                }
                Ok(false) => {
                    warn!(pid = %pid, "process not found for graceful termination");
                    TerminationResult::ProcessNotFound
                }
                Err(e) => {
                    warn!(pid = %pid, error = %e, "failed to gracefully terminate process");
                    TerminationResult::Failed(format!("Graceful termination failed: {e}"))
                }
            }
        } else {
            TerminationResult::ProcessNotFound
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        if let Some(pid) = handle.pid() {
            match self.taskkill(pid.0, true).await {
                Ok(true) => {
                    info!(pid = %pid, "force killed process");
                    if let Err(e) = handle.kill().await {
                        warn!(error = %e, "handle kill cleanup failed");
                    }
                    TerminationResult::Success
                }
                Ok(false) => {
                    info!(pid = %pid, "process not found for force kill");
                    TerminationResult::ProcessNotFound
                }
                Err(e) => {
                    warn!(pid = %pid, error = %e, "failed to force kill process");
                    TerminationResult::Failed(format!("Force kill failed: {e}"))
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

        // taskkill /T handles the whole tree in one call
        match self.taskkill_tree(root_pid.0).await {
            Ok(true) => {
                info!(root_pid = %root_pid, "terminated process tree");
                TerminationResult::Success
            }
            Ok(false) => {
                info!(root_pid = %root_pid, "process tree not found");
                TerminationResult::ProcessNotFound
            }
            Err(e) => {
                warn!(root_pid = %root_pid, error = %e, "taskkill tree failed, falling back to manual walk");

                let children = match self.find_child_processes(root_pid).await {
                    Ok(children) => children,
                    Err(e) => {
                        warn!(root_pid = %root_pid, error = %e, "failed to find child processes");
                        return TerminationResult::Failed(format!(
                            "Failed to enumerate children: {e}"
                        ));
                    }
                };

                // Children first, bottom-up
                for child_pid in children.iter().rev() {
                    match self.terminate_single_process(*child_pid).await {
                        TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                        result => {
                            warn!(pid = %child_pid, result = ?result, "failed to terminate child process");
                        }
                    }
                }

                self.terminate_single_process(root_pid).await
            }
        }
    }

    async fn terminate_process_group(&self, _pid: ProcessId) -> TerminationResult {
        // Windows has no Unix-style process groups
        TerminationResult::ProcessNotFound
    }
}

impl WindowsProcessManager {
    /// Use taskkill to terminate a single process
    async fn taskkill(&self, pid: u32, force: bool) -> Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", &pid_string];
        if force {
            args.push("/F");
        }

        let output = Command::new("taskkill").args(&args).output().await?;

        Ok(output.status.success())
    }

    /// Use taskkill with /T to terminate a process tree
    async fn taskkill_tree(&self, pid: u32) -> Result<bool> {
        let output = Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await?;

        Ok(output.status.success())
    }

    /// Terminate a single process by PID with escalation
    async fn terminate_single_process(&self, pid: ProcessId) -> TerminationResult {
        match self.taskkill(pid.0, false).await {
            Ok(true) => {
                info!(pid = %pid, "sent graceful termination to process");

                tokio::time::sleep(Duration::from_millis(1000)).await;

                let mut system = System::new();
                system.refresh_processes_specifics(
                    sysinfo::ProcessesToUpdate::All,
                    true,
                    sysinfo::ProcessRefreshKind::default(),
                );

                if system.processes().keys().any(|p| p.as_u32() == pid.0) {
                    match self.taskkill(pid.0, true).await {
                        Ok(_) => {
                            info!(pid = %pid, "force killed process");
                            TerminationResult::Success
                        }
                        Err(e) => {
                            warn!(pid = %pid, error = %e, "failed to force kill process");
                            TerminationResult::Failed(format!("Force kill failed: {e}"))
                        }
                    }
                } else {
                    info!(pid = %pid, "process terminated gracefully");
                    TerminationResult::Success
                }
            }
            Ok(false) => {
                info!(pid = %pid, "process not found (already terminated)");
                TerminationResult::Success
            }
            Err(e) => {
                warn!(pid = %pid, error = %e, "failed to send graceful termination");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
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
impl ProcessManager for WindowsProcessManager {
    fn new() -> Self {
        debug!("initializing windows process manager");
        Self {
            system: std::sync::Mutex::new(System::new_all()),
        }
    }

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}
