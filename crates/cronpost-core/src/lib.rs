//! `cronpost-core` — configuration and top-level error shared by every cronpost crate.

pub mod config;
pub mod error;

pub use config::CronpostConfig;
pub use error::{CronpostError, Result};
