//! Data models for citemap
//!
//! - Citation entities and the deduplicating dataset
//! - Pipeline run state machine
//! - Run report handed to renderers/exporters

pub mod citation;
pub mod harvest_session;
pub mod run_report;

pub use citation::{
    AnnotatedRecord, Author, CitationDataset, CitingRecord, CitingWork, GeoPoint, Publication,
    ResolvedAffiliation,
};
pub use harvest_session::{HarvestSession, HarvestState, StateTransition};
pub use run_report::{AbortReason, PipelineReport, RunSummary, SkippedUnit};
