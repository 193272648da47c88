//! Procdock core - platform-independent process supervision primitives
//!
//! This crate provides the app descriptors, restart policy, process
//! lifecycle traits, and error types that are shared across the
//! platform-specific process manager implementations.

pub mod config;
pub mod error;
pub mod launcher;
pub mod process;
pub mod stdio;

pub use config::*;
pub use error::*;
pub use launcher::*;
pub use process::*;
pub use stdio::*;
