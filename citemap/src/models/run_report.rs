//! Run report and summary counters

use super::{AnnotatedRecord, HarvestState};
use citemap_common::AffiliationPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unit of work skipped during harvesting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedUnit {
    /// Publication title or author profile id
    pub unit: String,
    pub reason: String,
}

/// Why a run ended before DONE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Too many consecutive upstream blocks while harvesting
    ConsecutiveBlocks { count: usize, threshold: usize },
    /// Harvest stopped by the caller (e.g. interrupt)
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ConsecutiveBlocks { count, threshold } => write!(
                f,
                "harvest aborted after {} consecutive upstream blocks (threshold {})",
                count, threshold
            ),
            AbortReason::Cancelled => write!(f, "harvest cancelled"),
        }
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub identifier: String,
    pub policy: AffiliationPolicy,
    pub from_cache: bool,
    pub subject_publications: usize,
    pub citing_records: usize,
    pub distinct_authors: usize,
    pub affiliations_resolved: usize,
    pub affiliations_unresolved: usize,
    pub institutions_located: usize,
    pub institutions_unlocated: usize,
    /// Citing papers without any linked author profile
    pub unlinked_citations: usize,
    pub skipped_publications: Vec<SkippedUnit>,
    pub skipped_authors: Vec<SkippedUnit>,
    pub abort_reason: Option<AbortReason>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary for {} ({} policy)", self.identifier, self.policy)?;
        if self.from_cache {
            writeln!(f, "  source: cache")?;
        }
        writeln!(f, "  subject publications: {}", self.subject_publications)?;
        writeln!(
            f,
            "  citing records: {} from {} distinct authors ({} unlinked citations)",
            self.citing_records, self.distinct_authors, self.unlinked_citations
        )?;
        writeln!(
            f,
            "  affiliations: {} resolved, {} unresolved",
            self.affiliations_resolved, self.affiliations_unresolved
        )?;
        writeln!(
            f,
            "  institutions: {} located, {} unlocated",
            self.institutions_located, self.institutions_unlocated
        )?;
        writeln!(
            f,
            "  skipped: {} publications, {} authors",
            self.skipped_publications.len(),
            self.skipped_authors.len()
        )?;
        if let Some(reason) = &self.abort_reason {
            writeln!(f, "  early abort: {}", reason)?;
        }
        Ok(())
    }
}

/// Everything handed to the external renderers/exporters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub final_state: HarvestState,
    /// Every state the run passed through, starting with IDLE
    pub visited_states: Vec<HarvestState>,
    pub records: Vec<AnnotatedRecord>,
    /// Distinct resolved institution names, sorted
    pub institutions: Vec<String>,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_mentions_abort_reason() {
        let summary = RunSummary {
            identifier: "abc".to_string(),
            abort_reason: Some(AbortReason::ConsecutiveBlocks {
                count: 3,
                threshold: 3,
            }),
            ..Default::default()
        };

        let text = summary.to_string();
        assert!(text.contains("abc"));
        assert!(text.contains("3 consecutive upstream blocks"));
    }

    #[test]
    fn test_summary_without_abort() {
        let summary = RunSummary {
            identifier: "abc".to_string(),
            affiliations_resolved: 4,
            affiliations_unresolved: 1,
            ..Default::default()
        };

        let text = summary.to_string();
        assert!(text.contains("4 resolved, 1 unresolved"));
        assert!(!text.contains("early abort"));
    }
}
