use crate::windows_process_manager::WindowsProcessManager;
use anyhow::{Context, Result};
use async_trait::async_trait;
use procdock_core::config::AppDescriptor;
use procdock_core::launcher::{AppProcessManager, AppProcessManagerFactory};
use procdock_core::process::{
    ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessTermination,
    TerminationResult,
};
use procdock_core::stdio::{AppStdErr, AppStdOut};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Windows launcher for one app descriptor.
///
/// Composes the low-level WindowsProcessManager for spawning and
/// taskkill-based termination while tracking the pids it has launched.
pub struct WindowsAppProcessManager {
    /// The underlying platform-specific process manager
    platform_manager: Arc<WindowsProcessManager>,
    /// Thread-safe tracking of live pids for this app
    active_processes: Arc<Mutex<HashMap<ProcessId, String>>>,
    /// The descriptor this launcher is bound to
    descriptor: AppDescriptor,
}

#[async_trait]
impl AppProcessManager for WindowsAppProcessManager {
    type Handle = Box<dyn ProcessHandle>;

    fn new(descriptor: &AppDescriptor) -> Self {
        Self {
            platform_manager: Arc::new(WindowsProcessManager::new()),
            active_processes: Arc::new(Mutex::new(HashMap::new())),
            descriptor: descriptor.clone(),
        }
    }

    async fn launch(&self, out: AppStdOut, err: AppStdErr) -> Result<Self::Handle> {
        let command_line = self.descriptor.command_line();

        let handle = self
            .platform_manager
            .spawn_process(
                &self.descriptor.name,
                &command_line.program,
                &command_line.args,
                Some(self.descriptor.cwd.as_path()),
                &self.descriptor.env,
                out,
                err,
            )
            .await
            .with_context(|| {
                format!(
                    "failed to launch app `{}` ({})",
                    self.descriptor.name,
                    command_line.rendered()
                )
            })?;

        if let Some(pid) = handle.pid() {
            let mut active = self.active_processes.lock().unwrap();
            active.insert(pid, self.descriptor.name.clone());
        }

        Ok(handle)
    }

    fn forget(&self, pid: ProcessId) {
        self.active_processes.lock().unwrap().remove(&pid);
    }

    async fn cleanup(&self) -> Result<()> {
        let active_processes = {
            let active = self.active_processes.lock().unwrap();
            active.keys().copied().collect::<Vec<_>>()
        };

        for pid in active_processes {
            let result = self.platform_manager.terminate_process_tree(pid).await;
            match result {
                TerminationResult::Success => {
                    tracing::info!(app = %self.descriptor.name, pid = %pid, "terminated process tree");
                }
                TerminationResult::ProcessNotFound => {
                    tracing::info!(pid = %pid, "process already terminated");
                }
                other => {
                    tracing::warn!(pid = %pid, result = ?other, "failed to terminate process");
                }
            }
        }

        self.active_processes.lock().unwrap().clear();

        self.platform_manager.cleanup().await
    }
}

impl Drop for WindowsAppProcessManager {
    fn drop(&mut self) {
        // Emergency sweep for anything still tracked when the launcher
        // goes away without cleanup()
        let active_processes = {
            let active = self.active_processes.lock().unwrap();
            active.keys().copied().collect::<Vec<_>>()
        };

        if !active_processes.is_empty() {
            tracing::warn!(
                app = %self.descriptor.name,
                count = active_processes.len(),
                "emergency cleanup: terminating processes during drop"
            );

            for pid in active_processes {
                let output = std::process::Command::new("taskkill")
                    .args(["/F", "/T", "/PID", &pid.0.to_string()])
                    .output();

                if let Err(e) = output {
                    tracing::error!(pid = %pid, error = %e, "failed to taskkill process during drop");
                }
            }
        }
    }
}

/// Factory for creating Windows launchers
pub struct WindowsAppProcessManagerFactory;

impl AppProcessManagerFactory for WindowsAppProcessManagerFactory {
    type Manager = WindowsAppProcessManager;

    fn create(descriptor: &AppDescriptor) -> Self::Manager {
        WindowsAppProcessManager::new(descriptor)
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
