//! Pipeline error types
//!
//! Per-item failures (skipped publications/authors, un-located institutions)
//! never reach this type; they are absorbed into the run report. Only
//! conditions that end a run surface here.

use crate::services::cache_store::CacheError;
use crate::services::source_client::SourceError;
use thiserror::Error;

/// Run-level error
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The subject profile could not be fetched at all; nothing to harvest
    #[error("Subject profile '{identifier}' could not be fetched: {source}")]
    FatalProfileFetch {
        identifier: String,
        #[source]
        source: SourceError,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// citemap-common error (configuration, atomic writes)
    #[error("Common error: {0}")]
    Common(#[from] citemap_common::Error),
}

/// Convenience result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
