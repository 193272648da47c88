use crate::unix_process_manager::UnixProcessManager;
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

/// Unix launcher for one app descriptor.
///
/// Composes the low-level UnixProcessManager for spawning and
/// signal-based termination while tracking the pids it has launched so
/// cleanup can tear down the full process tree.
pub struct UnixAppProcessManager {
    /// The underlying platform-specific process manager
    platform_manager: Arc<UnixProcessManager>,
    /// Thread-safe tracking of live pids for this app
    active_processes: Arc<Mutex<HashMap<ProcessId, String>>>,
    /// The descriptor this launcher is bound to
    descriptor: AppDescriptor,
}

#[async_trait]
impl AppProcessManager for UnixAppProcessManager {
    type Handle = Box<dyn ProcessHandle>;

    fn new(descriptor: &AppDescriptor) -> Self {
        Self {
            platform_manager: Arc::new(UnixProcessManager::new()),
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

impl Drop for UnixAppProcessManager {
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
                use nix::sys::signal::{self, Signal};
                use nix::unistd::Pid as NixPid;

                let nix_pid = NixPid::from_raw(pid.0 as i32);

                if let Err(e) = signal::kill(nix_pid, Signal::SIGTERM) {
                    tracing::warn!(pid = %pid, error = %e, "failed to SIGTERM process during drop");

                    if let Err(e) = signal::kill(nix_pid, Signal::SIGKILL) {
                        tracing::error!(pid = %pid, error = %e, "failed to SIGKILL process during drop");
                    }
                }
            }
        }
    }
}

/// Factory for creating Unix launchers
pub struct UnixAppProcessManagerFactory;

impl AppProcessManagerFactory for UnixAppProcessManagerFactory {
    type Manager = UnixAppProcessManager;

    fn create(descriptor: &AppDescriptor) -> Self::Manager {
        UnixAppProcessManager::new(descriptor)
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinks() -> (AppStdOut, AppStdErr) {
        let (out_end, _) = tokio::io::duplex(4096);
        let (err_end, _) = tokio::io::duplex(4096);
        (
            AppStdOut::new(Box::new(out_end)),
            AppStdErr::new(Box::new(err_end)),
        )
    }

    #[tokio::test]
    async fn test_launch_builds_command_from_descriptor() {
        // sh -c exit via the interpreter path
        let descriptor = AppDescriptor::builder()
            .name("clean-exit")
            .script("-c")
            .args("exit")
            .interpreter("sh")
            .build()
            .unwrap();

        let manager = UnixAppProcessManager::new(&descriptor);
        let (out, err) = sinks();

        let mut handle = manager.launch(out, err).await.unwrap();
        let status = handle.wait().await.unwrap();
        assert!(status.success());

        manager.cleanup().await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_missing_binary_fails() {
        let descriptor = AppDescriptor::builder()
            .name("broken")
            .script("definitely-not-a-real-binary-procdock")
            .build()
            .unwrap();

        let manager = UnixAppProcessManager::new(&descriptor);
        let (out, err) = sinks();

        let Err(error) = manager.launch(out, err).await else {
            panic!("launch of a missing binary succeeded");
        };
        // Error carries the app name for diagnosis
        let message = format!("{error:#}");
        assert!(message.contains("broken"));
    }

    #[tokio::test]
    async fn test_cleanup_terminates_tracked_process() {
        let descriptor = AppDescriptor::builder()
            .name("sleeper")
            .script("sleep")
            .args("30")
            .build()
            .unwrap();

        let manager = UnixAppProcessManager::new(&descriptor);
        let (out, err) = sinks();

        let mut handle = manager.launch(out, err).await.unwrap();
        assert!(handle.is_running().await);

        manager.cleanup().await.unwrap();

        // The signal has been delivered; reap and check the exit
        let status = handle.wait().await.unwrap();
        assert!(!status.success());
    }
}
