//! # Tidings Core
//!
//! Shared error type and configuration for the Tidings workspace.

pub mod config;
pub mod error;

pub use config::TidingsConfig;
pub use error::{Result, TidingsError};
