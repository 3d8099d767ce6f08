//! Phase: RESOLVING_AFFILIATIONS

use super::PipelineOrchestrator;
use crate::models::{CitationDataset, HarvestSession, HarvestState, ResolvedAffiliation, RunSummary};
use crate::services::affiliation_resolver::resolve_all;
use crate::services::geocoder::Geocoder;
use std::collections::{BTreeMap, BTreeSet};

impl<G: Geocoder> PipelineOrchestrator<G> {
    /// RESOLVING_AFFILIATIONS: one policy for every author, no network
    pub(super) fn phase_resolving(
        &self,
        session: &mut HarvestSession,
        dataset: &CitationDataset,
        summary: &mut RunSummary,
    ) -> BTreeMap<String, ResolvedAffiliation> {
        session.transition_to(HarvestState::ResolvingAffiliations);
        tracing::info!(
            identifier = %session.identifier,
            policy = %self.options.policy,
            authors = dataset.author_count(),
            "Phase: RESOLVING_AFFILIATIONS"
        );

        let resolved = resolve_all(dataset, self.options.policy);

        summary.affiliations_resolved = resolved
            .values()
            .filter(|r| r.resolved_name.is_some())
            .count();
        summary.affiliations_unresolved = resolved.len() - summary.affiliations_resolved;

        if self.options.print_affiliations {
            let pairs: BTreeSet<(&str, &str)> = resolved
                .values()
                .filter_map(|r| {
                    r.resolved_name
                        .as_deref()
                        .map(|name| (r.author.as_str(), name))
                })
                .collect();
            for (author, affiliation) in pairs {
                tracing::info!(author = %author, affiliation = %affiliation, "Citing affiliation");
            }
        }

        tracing::info!(
            resolved = summary.affiliations_resolved,
            unresolved = summary.affiliations_unresolved,
            "Affiliations resolved"
        );
        resolved
    }
}
