//! `covenant-core`: configuration and shared error type for the
//! subscription service.

pub mod config;
pub mod error;

pub use config::CovenantConfig;
pub use error::{CovenantError, Result};
