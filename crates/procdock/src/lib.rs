//! Procdock - a minimal process supervisor.
//!
//! Loads an ordered list of app descriptors (name, script, args,
//! interpreter, working directory, environment overlay), launches one
//! OS process per descriptor, and keeps them alive per restart policy.
//!
//! ```rust,no_run
//! use procdock::{AppRegistry, RestartConfig, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = AppRegistry::from_path("apps.json")?;
//!     let mut supervisor = Supervisor::new(registry, RestartConfig::default())?;
//!     let status = supervisor.status();
//!
//!     supervisor.start().await?;
//!     for app in status.snapshot().await {
//!         println!("{}: {:?}", app.name, app.state);
//!     }
//!
//!     supervisor.wait().await;
//!     Ok(())
//! }
//! ```

mod platform_factory;
mod status;
mod supervisor;

// Re-export core types
pub use platform_factory::{PlatformAppProcessManagerFactory, platform_name};
pub use procdock_core::*;
pub use status::{AppState, AppStatus, StatusReporter};
pub use supervisor::Supervisor;
