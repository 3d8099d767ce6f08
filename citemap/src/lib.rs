//! citemap library interface
//!
//! Harvests the works citing a researcher's publications, resolves each
//! citing author's affiliation and geocodes it.
//!
//! Exposed as a library for the binary and for integration testing.

pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{PipelineError, PipelineResult};
