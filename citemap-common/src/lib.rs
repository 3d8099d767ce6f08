//! # citemap common library
//!
//! Shared code for the citemap crates:
//! - Error type and result alias
//! - TOML configuration model and loading
//! - Cache folder resolution
//! - Atomic file writes

pub mod config;
pub mod error;

pub use config::{AffiliationPolicy, TomlConfig};
pub use error::{Error, Result};
