//! Unix-specific process management for procdock

mod unix_process_manager;

#[cfg(unix)]
mod app_process_manager;

#[cfg(unix)]
pub use app_process_manager::{UnixAppProcessManager, UnixAppProcessManagerFactory};
pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};
