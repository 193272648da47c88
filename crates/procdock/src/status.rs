use procdock_core::config::AppRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Observed state of one managed app
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum AppState {
    /// Descriptor loaded, process not yet launched
    Starting,
    /// Process is alive
    Running { pid: u32, restarts: u32 },
    /// Process exited, waiting out the restart delay
    Backoff { restarts: u32 },
    /// Process exited cleanly and the policy does not restart clean exits
    Completed { exit_code: Option<i32> },
    /// Process is gone for good (crash loop exhausted or unrecoverable error)
    Failed { reason: String },
    /// Supervisor shut the app down
    Stopped,
}

impl AppState {
    pub fn is_running(&self) -> bool {
        matches!(self, AppState::Running { .. })
    }

    /// Whether the supervisor will take no further action for this app
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppState::Completed { .. } | AppState::Failed { .. } | AppState::Stopped
        )
    }
}

/// One app's name and current state, as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: AppState,
}

/// Read-side view of the supervisor's per-app states.
///
/// Cheap to clone; every clone observes the same underlying map.
/// Snapshots are reported in the registry's declaration order.
#[derive(Clone)]
pub struct StatusReporter {
    order: Arc<Vec<String>>,
    states: Arc<RwLock<HashMap<String, AppState>>>,
}

impl StatusReporter {
    pub(crate) fn new(registry: &AppRegistry) -> Self {
        let order = registry.names();
        let states = order
            .iter()
            .map(|name| (name.clone(), AppState::Starting))
            .collect();

        Self {
            order: Arc::new(order),
            states: Arc::new(RwLock::new(states)),
        }
    }

    pub(crate) async fn set(&self, name: &str, state: AppState) {
        let mut states = self.states.write().await;
        states.insert(name.to_string(), state);
    }

    /// Current state of one app, None for unknown names
    pub async fn state_of(&self, name: &str) -> Option<AppState> {
        let states = self.states.read().await;
        states.get(name).cloned()
    }

    /// All app states in declaration order
    pub async fn snapshot(&self) -> Vec<AppStatus> {
        let states = self.states.read().await;
        self.order
            .iter()
            .filter_map(|name| {
                states.get(name).map(|state| AppStatus {
                    name: name.clone(),
                    state: state.clone(),
                })
            })
            .collect()
    }

    /// Whether every app has reached a terminal state
    pub async fn all_terminal(&self) -> bool {
        let states = self.states.read().await;
        states.values().all(AppState::is_terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procdock_core::config::AppDescriptor;

    fn two_app_registry() -> AppRegistry {
        AppRegistry::from_descriptors([
            AppDescriptor::builder()
                .name("chat-backend")
                .script("uvicorn")
                .build()
                .unwrap(),
            AppDescriptor::builder()
                .name("agent-manager")
                .script("scripts/start_agents.py")
                .build()
                .unwrap(),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_preserves_declaration_order() {
        let reporter = StatusReporter::new(&two_app_registry());

        // Update in reverse order, snapshot order must not change
        reporter
            .set("agent-manager", AppState::Running { pid: 2, restarts: 0 })
            .await;
        reporter
            .set("chat-backend", AppState::Running { pid: 1, restarts: 0 })
            .await;

        let snapshot = reporter.snapshot().await;
        assert_eq!(snapshot[0].name, "chat-backend");
        assert_eq!(snapshot[1].name, "agent-manager");
    }

    #[tokio::test]
    async fn test_state_transitions_visible_to_clones() {
        let reporter = StatusReporter::new(&two_app_registry());
        let observer = reporter.clone();

        assert_eq!(
            observer.state_of("chat-backend").await,
            Some(AppState::Starting)
        );

        reporter.set("chat-backend", AppState::Stopped).await;
        assert_eq!(
            observer.state_of("chat-backend").await,
            Some(AppState::Stopped)
        );
        assert_eq!(observer.state_of("unknown").await, None);
    }

    #[tokio::test]
    async fn test_all_terminal() {
        let reporter = StatusReporter::new(&two_app_registry());
        assert!(!reporter.all_terminal().await);

        reporter
            .set("chat-backend", AppState::Completed { exit_code: Some(0) })
            .await;
        reporter
            .set(
                "agent-manager",
                AppState::Failed {
                    reason: "restart limit exceeded".to_string(),
                },
            )
            .await;
        assert!(reporter.all_terminal().await);
    }

    #[test]
    fn test_state_serialization() {
        let status = AppStatus {
            name: "chat-backend".to_string(),
            state: AppState::Running {
                pid: 8014,
                restarts: 2,
            },
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["name"], "chat-backend");
        assert_eq!(json["state"], "running");
        assert_eq!(json["pid"], 8014);
    }
}
