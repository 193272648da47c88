use crate::platform_factory::{PlatformAppProcessManagerFactory, platform_name};
use crate::status::{AppState, StatusReporter};
use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use procdock_core::config::{AppDescriptor, AppRegistry, RestartConfig};
use procdock_core::error::SupervisorError;
use procdock_core::launcher::{AppProcessManager, AppProcessManagerFactory};
use procdock_core::process::ProcessHandle;
use procdock_core::stdio::{AppStdErr, AppStdOut};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type PlatformManager = <PlatformAppProcessManagerFactory as AppProcessManagerFactory>::Manager;
type PlatformHandle = <PlatformManager as AppProcessManager>::Handle;

/// Supervisor keeps one OS process alive per registered app descriptor.
///
/// `start()` launches every app in declaration order and fails fast on
/// the first launch error; a misconfigured process list halts startup
/// instead of running partially. Once started, each app is watched by
/// its own monitor task that restarts it according to the
/// [`RestartConfig`] and publishes state transitions through the
/// [`StatusReporter`].
pub struct Supervisor {
    registry: AppRegistry,
    restart_config: RestartConfig,
    status: StatusReporter,
    cancellation_token: CancellationToken,
    monitors: Vec<tokio::task::JoinHandle<()>>,
    out: AppStdOut,
    err: AppStdErr,
    started: bool,
}

impl Supervisor {
    /// Create a supervisor over a loaded registry. The restart policy is
    /// validated here so a bad policy fails before anything is spawned.
    pub fn new(registry: AppRegistry, restart_config: RestartConfig) -> Result<Self, SupervisorError> {
        restart_config
            .validate()
            .map_err(|e| SupervisorError::InvalidPolicy(e.to_string()))?;

        Ok(Self {
            status: StatusReporter::new(&registry),
            registry,
            restart_config,
            cancellation_token: CancellationToken::new(),
            monitors: Vec::new(),
            out: AppStdOut::stdout(),
            err: AppStdErr::stderr(),
            started: false,
        })
    }

    /// Redirect forwarded child output to the given sinks instead of the
    /// supervisor's own stdio
    pub fn with_output(mut self, out: AppStdOut, err: AppStdErr) -> Self {
        self.out = out;
        self.err = err;
        self
    }

    /// Handle for observing per-app states
    pub fn status(&self) -> StatusReporter {
        self.status.clone()
    }

    /// Launch every app in declaration order and begin supervising.
    ///
    /// On the first launch failure everything already launched is torn
    /// down and the error is returned; no monitor tasks are left behind.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.started {
            return Err(SupervisorError::process_error("supervisor already started"));
        }

        info!(
            apps = self.registry.len(),
            platform = platform_name(),
            "starting supervisor"
        );

        let mut launched: Vec<(AppDescriptor, PlatformManager, PlatformHandle)> =
            Vec::with_capacity(self.registry.len());

        for descriptor in self.registry.iter() {
            let manager = PlatformAppProcessManagerFactory::create(descriptor);
            match manager.launch(self.out.clone(), self.err.clone()).await {
                Ok(handle) => {
                    if let Some(pid) = handle.pid() {
                        self.status
                            .set(&descriptor.name, AppState::Running { pid: pid.0, restarts: 0 })
                            .await;
                    }
                    launched.push((descriptor.clone(), manager, handle));
                }
                Err(e) => {
                    error!(app = %descriptor.name, error = %e, "launch failed, aborting startup");
                    self.status
                        .set(
                            &descriptor.name,
                            AppState::Failed {
                                reason: format!("{e:#}"),
                            },
                        )
                        .await;

                    // Partial startup is worse than no startup: tear down
                    // whatever already launched before reporting the error
                    for (already, manager, _) in &launched {
                        if let Err(cleanup_err) = manager.cleanup().await {
                            warn!(app = %already.name, error = %cleanup_err, "teardown after aborted startup failed");
                        }
                        self.status.set(&already.name, AppState::Stopped).await;
                    }

                    return Err(SupervisorError::launch_failed(format!(
                        "app `{}`: {e:#}",
                        descriptor.name
                    )));
                }
            }
        }

        for (descriptor, manager, handle) in launched {
            self.monitors.push(tokio::spawn(monitor_app(
                descriptor,
                manager,
                handle,
                self.restart_config.clone(),
                self.status.clone(),
                self.cancellation_token.clone(),
                self.out.clone(),
                self.err.clone(),
            )));
        }

        self.started = true;
        Ok(())
    }

    /// Wait until every app has reached a terminal state
    pub async fn wait(&mut self) {
        for monitor in self.monitors.drain(..) {
            if let Err(e) = monitor.await {
                warn!(error = %e, "monitor task ended abnormally");
            }
        }
    }

    /// Stop all apps and wait for the monitors to finish
    pub async fn shutdown(mut self) -> Result<(), SupervisorError> {
        info!("shutting down supervisor");
        self.cancellation_token.cancel();
        self.wait().await;
        info!("supervisor shut down");
        Ok(())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Monitors terminate their children when the token fires
        self.cancellation_token.cancel();
    }
}

/// Per-app monitor: waits for the process to exit or the supervisor to
/// shut down, and relaunches per policy with backoff pacing.
async fn monitor_app(
    descriptor: AppDescriptor,
    manager: PlatformManager,
    mut handle: PlatformHandle,
    restart_config: RestartConfig,
    status: StatusReporter,
    cancellation_token: CancellationToken,
    out: AppStdOut,
    err: AppStdErr,
) {
    let name = descriptor.name.clone();
    let mut restarts: u32 = 0;
    let mut backoff = build_backoff(&restart_config);

    loop {
        let pid = handle.pid();
        if let Some(pid) = pid {
            status
                .set(&name, AppState::Running { pid: pid.0, restarts })
                .await;
        }
        let spawned_at = Instant::now();

        let exit = tokio::select! {
            _ = cancellation_token.cancelled() => {
                info!(app = %name, "cancellation requested, terminating app");
                if let Err(e) = manager.cleanup().await {
                    warn!(app = %name, error = %e, "cleanup failed during shutdown");
                }
                // Reap so no zombie outlives the monitor
                let _ = handle.wait().await;
                status.set(&name, AppState::Stopped).await;
                return;
            }
            result = handle.wait() => result,
        };

        // The process is gone, no emergency cleanup needed for this pid
        if let Some(pid) = pid {
            manager.forget(pid);
        }

        let exit_status = match exit {
            Ok(exit_status) => exit_status,
            Err(e) => {
                error!(app = %name, error = %e, "failed waiting for app process");
                status
                    .set(
                        &name,
                        AppState::Failed {
                            reason: format!("wait failed: {e}"),
                        },
                    )
                    .await;
                return;
            }
        };

        let clean = exit_status.success();
        if clean {
            info!(app = %name, "app exited cleanly");
        } else {
            warn!(app = %name, exit_code = ?exit_status.exit_code(), "app exited with failure");
        }

        let should_restart = if clean {
            restart_config.restart_on_success
        } else {
            restart_config.restart_on_failure
        };

        if !should_restart {
            if clean {
                status
                    .set(
                        &name,
                        AppState::Completed {
                            exit_code: exit_status.exit_code(),
                        },
                    )
                    .await;
            } else {
                status
                    .set(
                        &name,
                        AppState::Failed {
                            reason: format!("exited with code {:?}", exit_status.exit_code()),
                        },
                    )
                    .await;
            }
            return;
        }

        // A run longer than the maximum delay counts as healthy and ends
        // the previous crash loop
        if spawned_at.elapsed() >= restart_config.max_delay() {
            backoff = build_backoff(&restart_config);
        }

        handle = loop {
            let Some(delay) = backoff.next() else {
                warn!(app = %name, restarts, "restart limit exceeded");
                status
                    .set(
                        &name,
                        AppState::Failed {
                            reason: "restart limit exceeded".to_string(),
                        },
                    )
                    .await;
                return;
            };

            restarts += 1;
            status.set(&name, AppState::Backoff { restarts }).await;

            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    status.set(&name, AppState::Stopped).await;
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match manager.launch(out.clone(), err.clone()).await {
                Ok(new_handle) => {
                    info!(app = %name, restarts, "app restarted");
                    break new_handle;
                }
                Err(e) => {
                    // A failed spawn consumes a backoff slot like a crash
                    warn!(app = %name, error = %format!("{e:#}"), "relaunch failed");
                }
            }
        };
    }
}

/// Build the restart pacing iterator from the configured policy
fn build_backoff(config: &RestartConfig) -> ExponentialBackoff {
    let mut builder = ExponentialBuilder::default()
        .with_min_delay(config.min_delay())
        .with_max_delay(config.max_delay())
        .with_max_times(config.max_restarts as usize);

    if !config.use_exponential_backoff {
        builder = builder.with_factor(1.0);
    }
    if config.jitter_factor > 0.0 {
        builder = builder.with_jitter();
    }

    builder.build()
}
