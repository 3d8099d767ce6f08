//! Harvest checkpoint store
//!
//! One JSON envelope per subject identifier at
//! `<root>/<identifier>/citing_records.json`, holding the dataset as it was
//! before affiliation resolution. Never expires; delete the folder to force a
//! fresh harvest.

use crate::models::CitationDataset;
use chrono::{DateTime, Utc};
use citemap_common::config::write_atomic;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CACHE_FILE_NAME: &str = "citing_records.json";
pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid cache identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Cache write failed: {0}")]
    Write(#[from] citemap_common::Error),
}

/// Persisted form of one harvest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEnvelope {
    pub format_version: u32,
    pub identifier: String,
    pub harvested_at: DateTime<Utc>,
    /// False when the harvest was aborted before every publication was walked
    pub complete: bool,
    pub dataset: CitationDataset,
}

/// Where harvest checkpoints live, if anywhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStore {
    root: Option<PathBuf>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// A store that never reads or writes anything
    pub fn disabled() -> Self {
        Self { root: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Cache file for `identifier`; `None` when caching is disabled
    pub fn path_for(&self, identifier: &str) -> Result<Option<PathBuf>, CacheError> {
        validate_identifier(identifier)?;
        Ok(self
            .root
            .as_ref()
            .map(|root| root.join(identifier).join(CACHE_FILE_NAME)))
    }

    /// Persist `dataset` for `identifier`
    ///
    /// Returns `false` (and writes nothing) when caching is disabled or the
    /// dataset has no records.
    pub fn save(
        &self,
        identifier: &str,
        dataset: &CitationDataset,
        complete: bool,
    ) -> Result<bool, CacheError> {
        let Some(path) = self.path_for(identifier)? else {
            return Ok(false);
        };
        if dataset.is_empty() {
            tracing::info!(identifier = %identifier, "Nothing harvested, cache not written");
            return Ok(false);
        }

        let envelope = CacheEnvelope {
            format_version: CACHE_FORMAT_VERSION,
            identifier: identifier.to_string(),
            harvested_at: Utc::now(),
            complete,
            dataset: dataset.clone(),
        };
        let json = serde_json::to_vec_pretty(&envelope).map_err(|e| CacheError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&path, &json)?;

        tracing::info!(
            identifier = %identifier,
            path = %path.display(),
            records = dataset.record_count(),
            complete,
            "Harvest cache written"
        );
        Ok(true)
    }

    /// Load the checkpoint for `identifier`, if one exists
    ///
    /// A file written by an unknown format version is treated as absent.
    pub fn load(&self, identifier: &str) -> Result<Option<CacheEnvelope>, CacheError> {
        let Some(path) = self.path_for(identifier)? else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(identifier = %identifier, path = %path.display(), "No harvest cache");
            return Ok(None);
        }

        let bytes = std::fs::read(&path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        let envelope: CacheEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if envelope.format_version != CACHE_FORMAT_VERSION {
            tracing::warn!(
                path = %path.display(),
                version = envelope.format_version,
                "Ignoring harvest cache with unknown format version"
            );
            return Ok(None);
        }
        if envelope.identifier != identifier {
            return Err(CacheError::Corrupt {
                path,
                message: format!("belongs to identifier '{}'", envelope.identifier),
            });
        }
        if !envelope.complete {
            tracing::warn!(
                identifier = %identifier,
                harvested_at = %envelope.harvested_at,
                "Loaded cache is from an aborted harvest and may be incomplete"
            );
        }

        tracing::info!(
            identifier = %identifier,
            records = envelope.dataset.record_count(),
            harvested_at = %envelope.harvested_at,
            "Harvest cache loaded"
        );
        Ok(Some(envelope))
    }
}

fn validate_identifier(identifier: &str) -> Result<(), CacheError> {
    let invalid = identifier.trim().is_empty()
        || identifier.contains("..")
        || identifier.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
        || identifier != identifier.trim();
    if invalid {
        return Err(CacheError::InvalidIdentifier(identifier.to_string()));
    }
    Ok(())
}
