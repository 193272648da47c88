//! Windows-specific process management for procdock

mod app_process_manager;
mod windows_process_manager;

pub use app_process_manager::{WindowsAppProcessManager, WindowsAppProcessManagerFactory};
pub use windows_process_manager::{WindowsProcessHandle, WindowsProcessManager};
