//! Phase: HARVESTING
//!
//! Subject profile fetch, then concurrent citing-work discovery

use super::PipelineOrchestrator;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{HarvestSession, HarvestState};
use crate::services::geocoder::Geocoder;
use crate::services::harvester::{HarvestOutcome, ParallelHarvester};
use tokio_util::sync::CancellationToken;

impl<G: Geocoder> PipelineOrchestrator<G> {
    /// HARVESTING: fails only when the subject profile itself is unreachable
    pub(super) async fn phase_harvesting(
        &self,
        session: &mut HarvestSession,
        identifier: &str,
        cancel_token: &CancellationToken,
    ) -> PipelineResult<HarvestOutcome> {
        session.transition_to(HarvestState::Harvesting);
        tracing::info!(identifier = %identifier, "Phase: HARVESTING");

        let publications = match self.source.fetch_profile(identifier).await {
            Ok(publications) => publications,
            Err(source) => {
                tracing::error!(
                    identifier = %identifier,
                    error = %source,
                    "Subject profile fetch failed, nothing to harvest"
                );
                session.transition_to(HarvestState::Partial);
                return Err(PipelineError::FatalProfileFetch {
                    identifier: identifier.to_string(),
                    source,
                });
            }
        };

        if publications.is_empty() {
            tracing::warn!(identifier = %identifier, "Subject profile lists no publications");
        }

        let harvester = ParallelHarvester::new(
            self.source.clone(),
            self.options.worker_count,
            self.options.block_abort_threshold,
        );
        Ok(harvester.harvest(&publications, cancel_token).await)
    }
}
