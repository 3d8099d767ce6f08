//! Utility modules

pub mod countries;
pub mod retry;

pub use retry::{execute_with_retry, RetryError, RetryPolicy};
