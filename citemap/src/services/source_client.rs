//! Upstream scholarly source abstraction
//!
//! `fetch_profile` lists the subject's own works; `fetch_citing_works` lazily
//! walks everything citing one of them. Blocks are reported distinctly from
//! "no results", and retry exhaustion is scoped to one unit of work.

use crate::models::{CitingWork, Publication};
use crate::services::scholar_parser::ScholarParseError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

/// The unit of work a failure is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    /// Subject profile, by identifier
    Profile(String),
    /// Citing-work discovery for one subject publication, by title
    Publication(String),
    /// One citing author's profile, by upstream id
    Author(String),
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkUnit::Profile(id) => write!(f, "profile '{}'", id),
            WorkUnit::Publication(title) => write!(f, "publication '{}'", title),
            WorkUnit::Author(id) => write!(f, "author '{}'", id),
        }
    }
}

/// Failure of one upstream request attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Rate-limited or otherwise soft-blocked; worth retrying after a longer pause
    #[error("soft block: {0}")]
    SoftBlock(String),

    /// Anti-automation defense (CAPTCHA, robot check, access denied);
    /// retried once the limiter has lengthened the spacing
    #[error("blocked: {0}")]
    HardBlock(String),

    #[error("not found")]
    NotFound,

    #[error("malformed response: {0}")]
    Parse(#[from] ScholarParseError),
}

impl FetchFailure {
    /// Transient failures get another attempt under the retry policy
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchFailure::Transport(_)
            | FetchFailure::SoftBlock(_)
            | FetchFailure::HardBlock(_)
            | FetchFailure::Parse(_) => true,
            FetchFailure::Status(code) => *code >= 500 || *code == 408,
            FetchFailure::NotFound => false,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, FetchFailure::SoftBlock(_) | FetchFailure::HardBlock(_))
    }
}

/// Source client errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Upstream anti-automation defense triggered
    #[error("Blocked by upstream while fetching {unit}: {reason}")]
    Blocked { unit: WorkUnit, reason: String },

    /// Legitimately absent
    #[error("Not found: {0}")]
    NotFound(WorkUnit),

    /// Retry ceiling reached for one unit of work
    #[error("Retries exhausted for {unit} after {attempts} attempts: {cause}")]
    FetchExhausted {
        unit: WorkUnit,
        attempts: u32,
        cause: FetchFailure,
    },

    /// Non-retryable request failure
    #[error("Request for {unit} failed: {cause}")]
    Request { unit: WorkUnit, cause: FetchFailure },

    /// Client could not be constructed (TLS backend, proxy URL, ...)
    #[error("Client configuration error: {0}")]
    Client(String),
}

impl SourceError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, SourceError::Blocked { .. })
    }

    pub fn unit(&self) -> Option<&WorkUnit> {
        match self {
            SourceError::Blocked { unit, .. }
            | SourceError::NotFound(unit)
            | SourceError::FetchExhausted { unit, .. }
            | SourceError::Request { unit, .. } => Some(unit),
            SourceError::Client(_) => None,
        }
    }
}

/// Lazy sequence of citing-work observations
pub type CitingWorkStream<'a> = BoxStream<'a, Result<CitingWork, SourceError>>;

/// Upstream scholarly data source
///
/// Implementations must be shareable across harvesting workers.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// The subject's own publications (`subject = true`)
    async fn fetch_profile(&self, identifier: &str) -> Result<Vec<Publication>, SourceError>;

    /// Every work citing `publication`, one author observation per item
    ///
    /// `NotFound` ends the stream without an error item. A publication-scoped
    /// error (`Blocked`, `FetchExhausted`) is the last item; an author-scoped
    /// error is yielded and the stream continues.
    fn fetch_citing_works<'a>(&'a self, publication: &'a Publication) -> CitingWorkStream<'a>;

    /// Citing papers that link no author profile, counted since the last
    /// `fetch_profile`
    fn unlinked_citations(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchFailure::Transport("reset".into()).is_retryable());
        assert!(FetchFailure::SoftBlock("429".into()).is_retryable());
        assert!(FetchFailure::Status(503).is_retryable());
        assert!(!FetchFailure::Status(400).is_retryable());
        assert!(FetchFailure::HardBlock("captcha".into()).is_retryable());
        assert!(!FetchFailure::NotFound.is_retryable());
        assert!(FetchFailure::Parse(ScholarParseError::MissingElement("profile name")).is_retryable());
    }

    #[test]
    fn test_error_unit() {
        let err = SourceError::FetchExhausted {
            unit: WorkUnit::Publication("Deep Nets".into()),
            attempts: 3,
            cause: FetchFailure::Status(500),
        };
        assert_eq!(err.unit(), Some(&WorkUnit::Publication("Deep Nets".into())));
        assert!(err.to_string().contains("publication 'Deep Nets'"));
        assert!(!err.is_blocked());
    }
}
