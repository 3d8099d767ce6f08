//! Citation pipeline orchestrator
//!
//! # State Progression
//! IDLE → HARVESTING → CACHE_WRITTEN → RESOLVING_AFFILIATIONS → GEOCODING → DONE
//!
//! A usable cache jumps IDLE → RESOLVING_AFFILIATIONS without touching the
//! source client. A fatal profile fetch or a block-abort ends the run in
//! PARTIAL; in the block-abort case the harvested records are cached first
//! and returned without affiliations or locations.
//!
//! Each stage lives in its own `phase_*` module. Only HARVESTING is
//! concurrent; every other stage runs sequentially in the calling task.

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    AnnotatedRecord, CitationDataset, GeoPoint, HarvestSession, HarvestState, PipelineReport,
    ResolvedAffiliation, RunSummary,
};
use crate::services::cache_store::{CacheError, CacheStore};
use crate::services::geocoder::{GeocodeResolver, Geocoder};
use crate::services::source_client::SourceClient;
use citemap_common::{AffiliationPolicy, TomlConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod phase_geocoding;
mod phase_harvesting;
mod phase_resolving;

/// Run-wide knobs taken from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub policy: AffiliationPolicy,
    pub worker_count: usize,
    pub block_abort_threshold: usize,
    /// Load and save the geocode variant cache under the cache folder
    pub persist_geocode_cache: bool,
    /// Log the sorted (author, affiliation) list after resolution
    pub print_affiliations: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        PipelineOptions::from_config(&TomlConfig::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            policy: config.affiliation_policy,
            worker_count: config.worker_count,
            block_abort_threshold: config.harvest.block_abort_threshold,
            persist_geocode_cache: config.geocode.persist_cache,
            print_affiliations: false,
        }
    }
}

/// Sequences harvesting, checkpointing, resolution and geocoding
pub struct PipelineOrchestrator<G> {
    source: Arc<dyn SourceClient>,
    cache: CacheStore,
    geocoder: GeocodeResolver<G>,
    options: PipelineOptions,
}

impl<G: Geocoder> PipelineOrchestrator<G> {
    pub fn new(
        source: Arc<dyn SourceClient>,
        cache: CacheStore,
        geocoder: GeocodeResolver<G>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            cache,
            geocoder,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn geocode_resolver(&self) -> &GeocodeResolver<G> {
        &self.geocoder
    }

    /// Execute the complete pipeline for one subject identifier
    ///
    /// Returns `Err` only for `FatalProfileFetch` and an unusable
    /// identifier. A block-abort returns `Ok` with `final_state = PARTIAL`,
    /// the abort reason in the summary and every harvested record
    /// un-annotated.
    pub async fn run(
        &mut self,
        identifier: &str,
        cancel_token: &CancellationToken,
    ) -> PipelineResult<PipelineReport> {
        let identifier = identifier.trim();
        let mut session = HarvestSession::new(identifier, self.options.policy);
        let mut summary = RunSummary {
            identifier: identifier.to_string(),
            policy: self.options.policy,
            ..Default::default()
        };

        tracing::info!(
            identifier = %identifier,
            policy = %self.options.policy,
            cache = ?self.cache.root(),
            "Starting citation pipeline"
        );

        let dataset = match self.load_cached(identifier)? {
            Some(dataset) => {
                summary.from_cache = true;
                dataset
            }
            None => {
                let outcome = self
                    .phase_harvesting(&mut session, identifier, cancel_token)
                    .await?;
                summary.unlinked_citations = self.source.unlinked_citations();
                summary.skipped_publications = outcome.skipped_publications;
                summary.skipped_authors = outcome.skipped_authors;

                self.phase_cache_write(&mut session, identifier, &outcome.dataset, outcome.abort.is_none());

                if let Some(abort) = outcome.abort {
                    fill_dataset_counts(&mut summary, &outcome.dataset);
                    summary.abort_reason = Some(abort);
                    session.transition_to(HarvestState::Partial);
                    tracing::warn!(identifier = %identifier, "{}", summary);
                    return Ok(PipelineReport {
                        final_state: session.state,
                        visited_states: session.visited_states(),
                        records: annotate(&outcome.dataset, &BTreeMap::new(), &BTreeMap::new()),
                        institutions: Vec::new(),
                        summary,
                    });
                }
                outcome.dataset
            }
        };

        fill_dataset_counts(&mut summary, &dataset);

        let resolved = self.phase_resolving(&mut session, &dataset, &mut summary);
        let locations = self
            .phase_geocoding(&mut session, &resolved, &mut summary)
            .await;

        let records = annotate(&dataset, &resolved, &locations);
        let institutions: Vec<String> = locations.keys().cloned().collect();

        session.transition_to(HarvestState::Done);
        tracing::info!(identifier = %identifier, "{}", summary);

        Ok(PipelineReport {
            final_state: session.state,
            visited_states: session.visited_states(),
            records,
            institutions,
            summary,
        })
    }

    /// Cached dataset for `identifier`, if usable
    ///
    /// A corrupt cache is logged and ignored so the run falls back to a fresh
    /// harvest; an identifier that cannot name a cache is an error.
    fn load_cached(&self, identifier: &str) -> PipelineResult<Option<CitationDataset>> {
        match self.cache.load(identifier) {
            Ok(Some(envelope)) => Ok(Some(envelope.dataset)),
            Ok(None) => Ok(None),
            Err(e @ CacheError::InvalidIdentifier(_)) => Err(PipelineError::Cache(e)),
            Err(e) => {
                tracing::warn!(identifier = %identifier, error = %e, "Unusable harvest cache, harvesting afresh");
                Ok(None)
            }
        }
    }

    /// Checkpoint the harvested dataset before any resolution
    ///
    /// Write failures are logged; the in-memory dataset still flows on.
    fn phase_cache_write(
        &self,
        session: &mut HarvestSession,
        identifier: &str,
        dataset: &CitationDataset,
        complete: bool,
    ) {
        match self.cache.save(identifier, dataset, complete) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(identifier = %identifier, "Harvest cache not written");
            }
            Err(e) => {
                tracing::error!(identifier = %identifier, error = %e, "Failed to write harvest cache");
            }
        }
        session.transition_to(HarvestState::CacheWritten);
    }
}

fn fill_dataset_counts(summary: &mut RunSummary, dataset: &CitationDataset) {
    summary.subject_publications = dataset.subject_publications().count();
    summary.citing_records = dataset.record_count();
    summary.distinct_authors = dataset.author_count();
}

/// Join records with their resolved affiliation and location
fn annotate(
    dataset: &CitationDataset,
    resolved: &BTreeMap<String, ResolvedAffiliation>,
    locations: &BTreeMap<String, Option<GeoPoint>>,
) -> Vec<AnnotatedRecord> {
    dataset
        .records()
        .map(|record| {
            let affiliation = resolved
                .get(&record.citing_author)
                .and_then(|r| r.resolved_name.clone());
            let location = affiliation
                .as_ref()
                .and_then(|name| locations.get(name))
                .cloned()
                .flatten();
            AnnotatedRecord {
                citing_author: record.citing_author.clone(),
                citing_paper: record.citing_paper.clone(),
                cited_paper: record.cited_paper.clone(),
                affiliation,
                location,
            }
        })
        .collect()
}

/// Distinct resolved institution names, sorted
fn distinct_institutions(resolved: &BTreeMap<String, ResolvedAffiliation>) -> BTreeSet<String> {
    resolved
        .values()
        .filter_map(|r| r.resolved_name.clone())
        .collect()
}
